//! Outgoing message batching.
//!
//! Each compute thread owns one [`RequestProcessor`] with one bucket per
//! destination worker. Sends targeting a co-located vertex short-circuit
//! straight into the local store when the job is asynchronous: under BSP
//! the co-located send still takes the cache path so it traverses the
//! store rotation with everything else. A bucket whose accumulated size
//! reaches the configured threshold is detached and handed to the
//! transport as one `SendWorkerMessages` request.

use crate::codec;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{OwnerMap, Vertex};
use crate::id::{Payload, TaskId, VertexId};
use crate::server_data::ServerData;
use crate::stats::WorkerCounters;
use crate::transport::Transport;
use crate::wire::{self, WorkerRequest};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Fixed framing overhead per (destination, message) pair: two u32 length
/// prefixes.
const PAIR_OVERHEAD: usize = 8;

#[derive(Default)]
struct WorkerBucket {
    batches: HashMap<u32, Vec<(Vec<u8>, Vec<u8>)>>,
    bytes: usize,
}

/// Per-compute-thread outgoing message batcher.
pub struct RequestProcessor<I: VertexId, M: Payload> {
    task_id: TaskId,
    is_async: bool,
    multi_phase: bool,
    need_all: bool,
    max_bytes: usize,
    slack_entries: usize,
    owner_map: Arc<OwnerMap<I>>,
    server_data: Arc<ServerData<I, M>>,
    transport: Arc<dyn Transport>,
    counters: Arc<WorkerCounters>,
    buckets: HashMap<TaskId, WorkerBucket>,
}

impl<I: VertexId, M: Payload> RequestProcessor<I, M> {
    pub fn new(
        config: &EngineConfig,
        task_id: TaskId,
        owner_map: Arc<OwnerMap<I>>,
        server_data: Arc<ServerData<I, M>>,
        transport: Arc<dyn Transport>,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        Self {
            task_id,
            is_async: config.is_async(),
            multi_phase: config.async_conf.multi_phase,
            need_all: config.async_conf.need_all_msgs,
            max_bytes: config.max_message_bytes_per_worker,
            // Pair-slot headroom reserved up front so a batch filling up to
            // the flush threshold does not reallocate on the way there.
            slack_entries: (config.initial_cache_slack / 128).max(4),
            owner_map,
            server_data,
            transport,
            counters,
            buckets: HashMap::new(),
        }
    }

    /// Route one message from `source` to `dest`.
    pub fn send_message(
        &mut self,
        source: &I,
        dest: &I,
        msg: &M,
        for_next_phase: bool,
    ) -> Result<()> {
        let owner = self.owner_map.owner_of(dest)?;
        let next_phase = for_next_phase && self.multi_phase;

        if self.is_async && owner.task_id == self.task_id {
            // Local short-circuit: no serialisation; the id is cloned into
            // the store since no encoded copy exists.
            let store = if next_phase {
                self.server_data.next_phase_local_store()?
            } else {
                self.server_data.local_store()?
            };
            store.add_message(owner.partition_id, dest, source, msg)?;
            self.counters.local_messages_sent.fetch_add(1, Ordering::Relaxed);
            self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let wire_pid = wire::wire_partition_id(owner.partition_id, next_phase)?;
        let dest_bytes = codec::encode(dest)?;
        let msg_bytes = if self.need_all {
            let mut b = codec::encode(source)?;
            b.extend_from_slice(&codec::encode(msg)?);
            b
        } else {
            codec::encode(msg)?
        };
        let pair_bytes = dest_bytes.len() + msg_bytes.len() + PAIR_OVERHEAD;

        let slack = self.slack_entries;
        let bucket = self.buckets.entry(owner.task_id).or_default();
        bucket
            .batches
            .entry(wire_pid)
            .or_insert_with(|| Vec::with_capacity(slack))
            .push((dest_bytes, msg_bytes));
        bucket.bytes += pair_bytes;
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);

        if bucket.bytes >= self.max_bytes {
            self.detach_and_send(owner.task_id)?;
        }
        Ok(())
    }

    /// Send `msg` along every out-edge of `vertex`.
    pub fn send_message_to_all_edges<V: Payload, E: Payload>(
        &mut self,
        vertex: &Vertex<I, V, E>,
        msg: &M,
        for_next_phase: bool,
    ) -> Result<()> {
        let source = vertex.id().clone();
        for edge in vertex.edges() {
            self.send_message(&source, &edge.target, msg, for_next_phase)?;
        }
        Ok(())
    }

    /// Detach every remaining bucket and emit a request for each.
    pub fn flush(&mut self) -> Result<()> {
        let tasks: Vec<TaskId> = self
            .buckets
            .iter()
            .filter(|(_, b)| !b.batches.is_empty())
            .map(|(t, _)| *t)
            .collect();
        for task in tasks {
            self.detach_and_send(task)?;
        }
        Ok(())
    }

    fn detach_and_send(&mut self, task: TaskId) -> Result<()> {
        let Some(bucket) = self.buckets.remove(&task) else {
            return Ok(());
        };
        if bucket.batches.is_empty() {
            return Ok(());
        }
        trace!(
            "task {}: flushing {} bytes of messages to task {task}",
            self.task_id, bucket.bytes
        );
        let batches: Vec<_> = bucket.batches.into_iter().collect();
        self.transport
            .send_request(task, WorkerRequest::SendWorkerMessages { batches })?;
        self.counters
            .message_bytes_sent
            .fetch_add(bucket.bytes as u64, Ordering::Relaxed);
        Ok(())
    }
}
