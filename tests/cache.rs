use anyhow::Result;
use irongraph::cache::RequestProcessor;
use irongraph::graph::{OwnerMap, PartitionOwner};
use irongraph::server_data::ServerData;
use irongraph::stats::WorkerCounters;
use irongraph::transport::Transport;
use irongraph::wire::{NEXT_PHASE_FLAG, WorkerRequest};
use irongraph::{AsyncConfig, EngineConfig, TaskId, codec};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Captures requests instead of delivering them.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(TaskId, WorkerRequest)>>,
}

impl Transport for RecordingTransport {
    fn send_request(&self, dst: TaskId, req: WorkerRequest) -> irongraph::Result<()> {
        self.sent.lock().push((dst, req));
        Ok(())
    }

    fn wait_all_requests(&self) -> irongraph::Result<()> {
        Ok(())
    }
}

/// Two tasks; even ids on task 0 (partition 0), odd ids on task 1
/// (partition 1).
fn owner_map() -> Arc<OwnerMap<u32>> {
    let owners = vec![
        PartitionOwner {
            partition_id: 0,
            worker_id: 0,
            task_id: 0,
        },
        PartitionOwner {
            partition_id: 1,
            worker_id: 1,
            task_id: 1,
        },
    ];
    Arc::new(OwnerMap::new(owners, |id: &u32| id % 2).expect("valid owner table"))
}

struct Fixture {
    server_data: Arc<ServerData<u32, u64>>,
    transport: Arc<RecordingTransport>,
    counters: Arc<WorkerCounters>,
    processor: RequestProcessor<u32, u64>,
}

fn fixture(config: EngineConfig) -> Fixture {
    let server_data = Arc::new(ServerData::new(&config));
    let transport = Arc::new(RecordingTransport::default());
    let counters = Arc::new(WorkerCounters::new());
    let processor = RequestProcessor::new(
        &config,
        0,
        owner_map(),
        Arc::clone(&server_data),
        transport.clone(),
        Arc::clone(&counters),
    );
    Fixture {
        server_data,
        transport,
        counters,
        processor,
    }
}

#[test]
fn bsp_routes_colocated_sends_through_the_cache() -> Result<()> {
    let mut fx = fixture(EngineConfig::default());
    // Destination 2 is on this task, but BSP must not short-circuit it.
    fx.processor.send_message(&4, &2, &77u64, false)?;
    assert!(fx.transport.sent.lock().is_empty());
    fx.processor.flush()?;

    let sent = fx.transport.sent.lock();
    assert_eq!(sent.len(), 1);
    let (dst, WorkerRequest::SendWorkerMessages { batches }) = &sent[0] else {
        panic!("expected a message batch");
    };
    assert_eq!(*dst, 0);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, 0);
    let (dest_bytes, msg_bytes) = &batches[0].1[0];
    assert_eq!(codec::decode::<u32>(dest_bytes)?.0, 2);
    assert_eq!(codec::decode::<u64>(msg_bytes)?.0, 77);

    assert_eq!(fx.counters.messages_sent.load(Ordering::Relaxed), 1);
    assert_eq!(fx.counters.local_messages_sent.load(Ordering::Relaxed), 0);
    assert!(fx.counters.message_bytes_sent.load(Ordering::Relaxed) > 0);
    Ok(())
}

#[test]
fn async_short_circuits_colocated_sends_into_the_local_store() -> Result<()> {
    let config = EngineConfig {
        async_conf: AsyncConfig {
            is_async: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut fx = fixture(config);
    fx.processor.send_message(&4, &2, &77u64, false)?;

    // No request, and the message is already in the local store.
    assert!(fx.transport.sent.lock().is_empty());
    let local = fx.server_data.local_store()?;
    assert!(local.has_messages_for_vertex(0, &2));
    assert_eq!(fx.counters.local_messages_sent.load(Ordering::Relaxed), 1);
    assert_eq!(fx.counters.messages_sent.load(Ordering::Relaxed), 1);
    assert_eq!(fx.counters.message_bytes_sent.load(Ordering::Relaxed), 0);

    // Remote destinations still take the cache.
    fx.processor.send_message(&4, &3, &88u64, false)?;
    fx.processor.flush()?;
    let sent = fx.transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1);
    Ok(())
}

#[test]
fn bucket_flushes_when_the_size_threshold_is_reached() -> Result<()> {
    let config = EngineConfig {
        max_message_bytes_per_worker: 32,
        ..Default::default()
    };
    let mut fx = fixture(config);
    for _ in 0..4 {
        fx.processor.send_message(&4, &3, &1u64, false)?;
    }
    // At least one bucket detached on its own, without an explicit flush.
    assert!(!fx.transport.sent.lock().is_empty());
    Ok(())
}

#[test]
fn next_phase_sends_set_the_high_bit() -> Result<()> {
    let config = EngineConfig {
        async_conf: AsyncConfig {
            is_async: true,
            multi_phase: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut fx = fixture(config);

    // Remote next-phase send carries the flag on the wire.
    fx.processor.send_message(&4, &3, &5u64, true)?;
    fx.processor.flush()?;
    let sent = fx.transport.sent.lock();
    let (_, WorkerRequest::SendWorkerMessages { batches }) = &sent[0] else {
        panic!("expected a message batch");
    };
    assert_eq!(batches[0].0, 1 | NEXT_PHASE_FLAG);
    drop(sent);

    // Co-located next-phase send lands in the next-phase local store.
    fx.processor.send_message(&4, &2, &6u64, true)?;
    assert!(
        fx.server_data
            .next_phase_local_store()?
            .has_messages_for_vertex(0, &2)
    );
    assert!(!fx.server_data.local_store()?.has_messages_for_vertex(0, &2));
    Ok(())
}

#[test]
fn need_all_messages_prefix_the_source_id() -> Result<()> {
    let config = EngineConfig {
        async_conf: AsyncConfig {
            is_async: true,
            need_all_msgs: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut fx = fixture(config);
    fx.processor.send_message(&4, &3, &99u64, false)?;
    fx.processor.flush()?;

    let sent = fx.transport.sent.lock();
    let (_, WorkerRequest::SendWorkerMessages { batches }) = &sent[0] else {
        panic!("expected a message batch");
    };
    let (_, msg_bytes) = &batches[0].1[0];
    let (source, used) = codec::decode::<u32>(msg_bytes)?;
    assert_eq!(source, 4);
    assert_eq!(codec::decode::<u64>(&msg_bytes[used..])?.0, 99);
    Ok(())
}
