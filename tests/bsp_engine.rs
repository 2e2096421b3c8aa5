//! BSP superstep semantics end to end over the in-process cluster.

use anyhow::Result;
use irongraph::store::Messages;
use irongraph::testing::{TestCluster, vertex};
use irongraph::{
    Computation, ComputeContext, DefaultResolver, EngineConfig, Vertex,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records every invocation as (superstep, vertex id, received messages).
struct Recording {
    log: Mutex<Vec<(u64, u32, Vec<u64>)>>,
}

impl Recording {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
        }
    }
}

impl Computation for Recording {
    type Id = u32;
    type Value = u64;
    type Edge = u64;
    type Message = u64;

    fn compute(
        &self,
        ctx: &mut ComputeContext<'_, Self>,
        vertex: &mut Vertex<u32, u64, u64>,
        messages: Messages<u64>,
    ) -> irongraph::Result<()> {
        let received: Vec<u64> = messages.collect();
        self.log
            .lock()
            .push((ctx.superstep(), *vertex.id(), received));
        if ctx.superstep() == 0 && *vertex.id() == 1 {
            ctx.send_message(&2, &42)?;
        }
        vertex.vote_to_halt();
        Ok(())
    }
}

#[test]
fn a_message_arrives_exactly_once_in_the_next_superstep() -> Result<()> {
    let computation = Arc::new(Recording::new());
    let cluster = TestCluster::new(
        2,
        2,
        EngineConfig::default(),
        Arc::clone(&computation),
        Arc::new(DefaultResolver),
    )?;
    cluster.add_vertex(vertex(1, 0, vec![2]))?;
    cluster.add_vertex(vertex(2, 0, vec![]))?;
    cluster.finish_loading()?;
    cluster.run_to_convergence(10)?;

    let log = computation.log.lock();
    let deliveries: Vec<_> = log
        .iter()
        .filter(|(_, v, msgs)| *v == 2 && !msgs.is_empty())
        .collect();
    assert_eq!(deliveries.len(), 1, "one delivery, no duplicates: {log:?}");
    let (superstep, _, msgs) = deliveries[0];
    assert_eq!(*superstep, 1, "sent in superstep 0, visible in 1");
    assert_eq!(msgs, &vec![42]);
    Ok(())
}

#[test]
fn halted_vertices_without_messages_stay_halted() -> Result<()> {
    let computation = Arc::new(Recording::new());
    let cluster = TestCluster::new(
        1,
        2,
        EngineConfig::default(),
        Arc::clone(&computation),
        Arc::new(DefaultResolver),
    )?;
    cluster.add_vertex(vertex(1, 0, vec![2]))?;
    cluster.add_vertex(vertex(2, 0, vec![]))?;
    cluster.finish_loading()?;
    cluster.run_to_convergence(10)?;

    let rounds = cluster.run_rounds(3)?;
    for round in rounds {
        for stats in round {
            assert_eq!(stats.computed, 0);
            assert!(stats.all_halted());
        }
    }
    Ok(())
}

/// Sends itself a message every superstep; would never terminate on its
/// own.
struct SelfPing;

impl Computation for SelfPing {
    type Id = u32;
    type Value = u64;
    type Edge = u64;
    type Message = u64;

    fn compute(
        &self,
        ctx: &mut ComputeContext<'_, Self>,
        vertex: &mut Vertex<u32, u64, u64>,
        _messages: Messages<u64>,
    ) -> irongraph::Result<()> {
        *vertex.value_mut() += 1;
        let me = *vertex.id();
        ctx.send_message(&me, &1)?;
        vertex.vote_to_halt();
        Ok(())
    }
}

#[test]
fn max_supersteps_forces_a_halt() -> Result<()> {
    let config = EngineConfig {
        max_supersteps: 5,
        ..Default::default()
    };
    let cluster = TestCluster::new(1, 1, config, Arc::new(SelfPing), Arc::new(DefaultResolver))?;
    cluster.add_vertex(vertex(1, 0, vec![]))?;
    cluster.finish_loading()?;
    cluster.run_to_convergence(20)?;

    // Computed exactly in supersteps 0..=4, then unconditionally halted.
    assert_eq!(cluster.vertex_value(&1), Some(5));
    Ok(())
}

/// Sends into the void: the destination vertex does not exist yet.
struct Spawner;

impl Computation for Spawner {
    type Id = u32;
    type Value = u64;
    type Edge = u64;
    type Message = u64;

    fn compute(
        &self,
        ctx: &mut ComputeContext<'_, Self>,
        vertex: &mut Vertex<u32, u64, u64>,
        messages: Messages<u64>,
    ) -> irongraph::Result<()> {
        if ctx.superstep() == 0 && *vertex.id() == 1 {
            ctx.send_message(&99, &7)?;
        }
        let sum: u64 = messages.sum();
        *vertex.value_mut() += sum;
        vertex.vote_to_halt();
        Ok(())
    }
}

#[test]
fn a_message_to_a_missing_vertex_creates_it() -> Result<()> {
    let cluster = TestCluster::new(
        2,
        2,
        EngineConfig::default(),
        Arc::new(Spawner),
        Arc::new(DefaultResolver),
    )?;
    cluster.add_vertex(vertex(1, 0, vec![]))?;
    cluster.finish_loading()?;
    assert_eq!(cluster.num_vertices(), 1);
    cluster.run_to_convergence(10)?;

    // Created lazily with a default value, then it consumed the message.
    assert!(cluster.vertex_exists(&99));
    assert_eq!(cluster.num_vertices(), 2);
    assert_eq!(cluster.vertex_value(&99), Some(7));
    Ok(())
}

#[test]
fn superstep_stats_report_counts_and_sends() -> Result<()> {
    let cluster = TestCluster::new(
        1,
        1,
        EngineConfig::default(),
        Arc::new(Recording::new()),
        Arc::new(DefaultResolver),
    )?;
    cluster.add_vertex(vertex(1, 0, vec![2]))?;
    cluster.add_vertex(vertex(2, 0, vec![]))?;
    cluster.finish_loading()?;

    let first = cluster.run_round()?;
    assert_eq!(first[0].vertices, 2);
    assert_eq!(first[0].edges, 1);
    assert_eq!(first[0].computed, 2);
    assert_eq!(first[0].sent.messages_sent, 1);
    assert!(first[0].sent.message_bytes_sent > 0);
    // BSP: no local short-circuit, even for the co-located destination.
    assert_eq!(first[0].sent.local_messages_sent, 0);
    Ok(())
}
