use anyhow::Result;
use irongraph::graph::{OwnerMap, PartitionOwner, PartitionStore, vertex_with_edges};
use irongraph::vertex_type::{VertexType, VertexTypeStore};

/// Worker 0 owns partitions 0 and 1; worker 1 owns partition 2.
/// Vertices 0-9 in partition 0, 10-19 in partition 1, 20+ in partition 2.
fn owner_map() -> OwnerMap<u32> {
    let owners = vec![
        PartitionOwner {
            partition_id: 0,
            worker_id: 0,
            task_id: 0,
        },
        PartitionOwner {
            partition_id: 1,
            worker_id: 0,
            task_id: 0,
        },
        PartitionOwner {
            partition_id: 2,
            worker_id: 1,
            task_id: 1,
        },
    ];
    OwnerMap::new(owners, |id: &u32| (id / 10).min(2)).expect("valid owner table")
}

fn edges(targets: &[u32]) -> Vec<(u32, ())> {
    targets.iter().map(|&t| (t, ())).collect()
}

#[test]
fn classification_matches_neighbour_placement() -> Result<()> {
    let owners = owner_map();
    let store: PartitionStore<u32, u64, ()> = PartitionStore::new();
    {
        let p0 = store.get_or_create(0);
        let mut p0 = p0.lock();
        // Only same-partition neighbours.
        p0.insert(vertex_with_edges(1, 0, edges(&[2, 3])));
        // A neighbour in partition 1, same worker.
        p0.insert(vertex_with_edges(2, 0, edges(&[1, 11])));
        // A neighbour on worker 1 only.
        p0.insert(vertex_with_edges(3, 0, edges(&[1, 21])));
        // Both kinds of out-of-partition neighbours.
        p0.insert(vertex_with_edges(4, 0, edges(&[11, 21])));
        // Self-loops do not count.
        p0.insert(vertex_with_edges(5, 0, edges(&[5])));
    }

    let types = VertexTypeStore::new(0);
    types.classify(&store, &owners)?;

    assert_eq!(types.vertex_type(&1), VertexType::Internal);
    assert_eq!(types.vertex_type(&2), VertexType::LocalBoundary);
    assert_eq!(types.vertex_type(&3), VertexType::RemoteBoundary);
    assert_eq!(types.vertex_type(&4), VertexType::MixedBoundary);
    assert_eq!(types.vertex_type(&5), VertexType::Internal);
    Ok(())
}

#[test]
fn unknown_vertices_default_to_internal() {
    let types: VertexTypeStore<u32> = VertexTypeStore::new(0);
    assert_eq!(types.vertex_type(&99), VertexType::Internal);
    assert!(types.is_empty());
}
