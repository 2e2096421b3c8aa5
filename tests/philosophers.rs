use anyhow::Result;
use irongraph::philosophers::PhilosophersTable;
use irongraph::stats::WorkerCounters;
use irongraph::transport::Transport;
use irongraph::wire::WorkerRequest;
use irongraph::{EngineError, TaskId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// All philosophers in these tests are co-located, so the transport must
/// never be touched.
struct NoTransport;

impl Transport for NoTransport {
    fn send_request(&self, dst: TaskId, _req: WorkerRequest) -> irongraph::Result<()> {
        Err(EngineError::Transport(format!(
            "unexpected remote send to task {dst}"
        )))
    }

    fn wait_all_requests(&self) -> irongraph::Result<()> {
        Ok(())
    }
}

/// Triangle of boundary vertices 10, 20, 30 with an edge between every
/// pair, registered from both endpoints.
fn triangle() -> Result<PhilosophersTable> {
    let table = PhilosophersTable::new(0, Arc::new(NoTransport), Arc::new(WorkerCounters::new()));
    for (p, q) in [(10, 20), (20, 10), (10, 30), (30, 10), (20, 30), (30, 20)] {
        table.add_neighbour(p, q, 0)?;
    }
    Ok(table)
}

fn fork_count(table: &PhilosophersTable, p: u64, q: u64) -> usize {
    table
        .fork_bits(p)
        .iter()
        .filter(|&&(n, _, fork, _)| n == q && fork)
        .count()
}

fn assert_one_fork_per_edge(table: &PhilosophersTable) {
    for (p, q) in [(10u64, 20u64), (10, 30), (20, 30)] {
        let total = fork_count(table, p, q) + fork_count(table, q, p);
        assert_eq!(total, 1, "edge ({p},{q}) must have exactly one fork");
    }
}

#[test]
fn initial_placement_puts_the_dirty_fork_at_the_larger_id() -> Result<()> {
    let table = triangle()?;
    // Higher endpoint holds the fork dirty, lower holds the token.
    for (low, high) in [(10u64, 20u64), (10, 30), (20, 30)] {
        let high_view = table.fork_bits(high);
        let (_, token, fork, dirty) = *high_view.iter().find(|e| e.0 == low).unwrap();
        assert!(!token && fork && dirty, "fork dirty at {high} for {low}");

        let low_view = table.fork_bits(low);
        let (_, token, fork, dirty) = *low_view.iter().find(|e| e.0 == high).unwrap();
        assert!(token && !fork && !dirty, "token at {low} for {high}");
    }
    assert_one_fork_per_edge(&table);
    Ok(())
}

#[test]
fn acquire_then_release_keeps_the_fork_invariant() -> Result<()> {
    let table = triangle()?;
    table.acquire_forks(10)?;
    // While eating, 10 holds both its forks.
    assert_eq!(fork_count(&table, 10, 20), 1);
    assert_eq!(fork_count(&table, 10, 30), 1);
    table.release_forks(10)?;
    assert_one_fork_per_edge(&table);
    Ok(())
}

#[test]
fn concurrent_acquires_are_mutually_exclusive_and_deadlock_free() -> Result<()> {
    let table = Arc::new(triangle()?);
    let eating = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|scope| {
        for p in [10u64, 20, 30] {
            let table = Arc::clone(&table);
            let eating = Arc::clone(&eating);
            let max_seen = Arc::clone(&max_seen);
            scope.spawn(move || {
                for _ in 0..50 {
                    table.acquire_forks(p).unwrap();
                    let now = eating.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::yield_now();
                    eating.fetch_sub(1, Ordering::SeqCst);
                    table.release_forks(p).unwrap();
                }
            });
        }
    });

    // In a triangle everyone neighbours everyone: one eater at a time.
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_one_fork_per_edge(&table);
    Ok(())
}

#[test]
fn duplicate_neighbour_is_fatal() -> Result<()> {
    let table = triangle()?;
    let err = table.add_neighbour(10, 20, 0).unwrap_err();
    assert!(matches!(
        err,
        EngineError::DuplicateNeighbour {
            philosopher: 10,
            neighbour: 20
        }
    ));
    Ok(())
}

#[test]
fn self_loops_are_skipped() -> Result<()> {
    let table = PhilosophersTable::new(0, Arc::new(NoTransport), Arc::new(WorkerCounters::new()));
    table.add_neighbour(7, 7, 0)?;
    // No per-edge state to wait on; acquisition is immediate.
    table.acquire_forks(7)?;
    table.release_forks(7)?;
    Ok(())
}

#[test]
fn non_philosophers_acquire_without_blocking() -> Result<()> {
    let table = triangle()?;
    table.acquire_forks(999)?;
    table.release_forks(999)?;
    Ok(())
}
