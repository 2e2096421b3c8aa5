//! Iterated k-core peeling with vertex removal: a vertex with fewer than k
//! edges announces its id to its neighbours and asks to be removed; the
//! resolver for this algorithm never re-creates a removed vertex.

use anyhow::Result;
use irongraph::store::Messages;
use irongraph::testing::{TestCluster, vertex};
use irongraph::{
    Computation, ComputeContext, EngineConfig, Vertex, VertexResolver,
};
use std::collections::HashSet;
use std::sync::Arc;

struct KCore {
    k: usize,
}

impl Computation for KCore {
    type Id = u32;
    type Value = u64;
    type Edge = u64;
    type Message = u32;

    fn compute(
        &self,
        ctx: &mut ComputeContext<'_, Self>,
        vertex: &mut Vertex<u32, u64, u64>,
        messages: Messages<u32>,
    ) -> irongraph::Result<()> {
        let gone: HashSet<u32> = messages.collect();
        if !gone.is_empty() {
            vertex.edges_mut().retain(|e| !gone.contains(&e.target));
        }
        if vertex.num_edges() < self.k {
            let me = *vertex.id();
            let neighbours: Vec<u32> = vertex.edges().iter().map(|e| e.target).collect();
            for n in &neighbours {
                ctx.send_message(n, &me)?;
            }
            ctx.remove_vertex(me)?;
        }
        vertex.vote_to_halt();
        Ok(())
    }
}

/// Removal is final: messages to a removed (or never existing) vertex do
/// not bring it back.
struct NoRevival;

impl VertexResolver<u32, u64, u64> for NoRevival {
    fn resolve(
        &self,
        _id: &u32,
        existing: Option<Vertex<u32, u64, u64>>,
        _has_messages: bool,
        removed: bool,
        _tombstoned: bool,
    ) -> Option<Vertex<u32, u64, u64>> {
        if removed { None } else { existing }
    }
}

fn mutation_config() -> EngineConfig {
    EngineConfig {
        allow_graph_mutation: true,
        ..Default::default()
    }
}

#[test]
fn three_core_of_a_clique_with_a_pendant_chain() -> Result<()> {
    let cluster = TestCluster::new(2, 2, mutation_config(), Arc::new(KCore { k: 3 }), Arc::new(NoRevival))?;

    // Undirected 4-clique {1,2,3,4} plus a chain 1-5-6 hanging off it.
    cluster.add_vertex(vertex(1, 0, vec![2, 3, 4, 5]))?;
    cluster.add_vertex(vertex(2, 0, vec![1, 3, 4]))?;
    cluster.add_vertex(vertex(3, 0, vec![1, 2, 4]))?;
    cluster.add_vertex(vertex(4, 0, vec![1, 2, 3]))?;
    cluster.add_vertex(vertex(5, 0, vec![1, 6]))?;
    cluster.add_vertex(vertex(6, 0, vec![5]))?;
    cluster.finish_loading()?;

    cluster.run_to_convergence(20)?;

    // The 3-core is the clique; the chain peels away.
    for id in [1u32, 2, 3, 4] {
        assert!(cluster.vertex_exists(&id), "vertex {id} belongs to the core");
        let edges = cluster
            .worker(cluster.owner_map().owner_of(&id)?.task_id)
            .read_vertex(&id, |v| v.num_edges())
            .unwrap();
        assert_eq!(edges, 3, "core vertex {id} keeps its clique edges");
    }
    assert!(!cluster.vertex_exists(&5));
    assert!(!cluster.vertex_exists(&6));
    assert_eq!(cluster.num_vertices(), 4);
    Ok(())
}

#[test]
fn messages_to_a_removed_vertex_do_not_recreate_it() -> Result<()> {
    let cluster = TestCluster::new(1, 2, mutation_config(), Arc::new(KCore { k: 3 }), Arc::new(NoRevival))?;

    // 5 and 6 both fall below k immediately and message each other while
    // both removals are in flight.
    cluster.add_vertex(vertex(5, 0, vec![6]))?;
    cluster.add_vertex(vertex(6, 0, vec![5]))?;
    cluster.finish_loading()?;
    cluster.run_to_convergence(20)?;

    assert!(!cluster.vertex_exists(&5));
    assert!(!cluster.vertex_exists(&6));
    assert_eq!(cluster.num_vertices(), 0);
    Ok(())
}

#[test]
fn everything_survives_when_k_is_low_enough() -> Result<()> {
    let cluster = TestCluster::new(1, 2, mutation_config(), Arc::new(KCore { k: 1 }), Arc::new(NoRevival))?;
    cluster.add_vertex(vertex(1, 0, vec![2]))?;
    cluster.add_vertex(vertex(2, 0, vec![1]))?;
    cluster.finish_loading()?;
    cluster.run_to_convergence(20)?;

    assert_eq!(cluster.num_vertices(), 2);
    Ok(())
}
