//! Append-only encoded message queues with destructive drain.

use super::{MessageStore, Messages};
use crate::codec::{self, EncodedQueue};
use crate::error::Result;
use crate::id::{Payload, PartitionId, VertexId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::marker::PhantomData;

type QueueMap<I> = DashMap<I, Mutex<EncodedQueue>>;

/// Per-partition, per-destination-vertex byte queues.
///
/// Appends within one destination are ordered; readers observe all of an
/// append or none of it. A drain followed by an append re-creates an empty
/// queue in place.
pub struct ByteQueueStore<I, M> {
    partitions: DashMap<PartitionId, QueueMap<I>>,
    buffer_limit: usize,
    _marker: PhantomData<fn() -> M>,
}

impl<I: VertexId, M: Payload> ByteQueueStore<I, M> {
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            partitions: DashMap::new(),
            buffer_limit,
            _marker: PhantomData,
        }
    }

    fn append_raw(&self, pid: PartitionId, dest: I, bytes: &[u8], count: usize) -> Result<()> {
        let partition = self.partitions.entry(pid).or_default();
        let queue = partition
            .entry(dest)
            .or_insert_with(|| Mutex::new(EncodedQueue::with_limit(self.buffer_limit)));
        queue.lock().push_raw(bytes, count)
    }
}

impl<I: VertexId, M: Payload> MessageStore<I, M> for ByteQueueStore<I, M> {
    fn add_message(&self, pid: PartitionId, dest: &I, _source: &I, msg: &M) -> Result<()> {
        let bytes = codec::encode(msg)?;
        self.append_raw(pid, dest.clone(), &bytes, 1)
    }

    fn add_encoded_batch(&self, pid: PartitionId, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (dest_bytes, msg_bytes) in pairs {
            let (dest, _) = codec::decode::<I>(dest_bytes)?;
            self.append_raw(pid, dest, msg_bytes, 1)?;
        }
        Ok(())
    }

    fn remove_vertex_messages(&self, pid: PartitionId, dest: &I) -> Result<Messages<M>> {
        let Some(partition) = self.partitions.get(&pid) else {
            return Ok(Messages::empty());
        };
        let Some(queue) = partition.get(dest) else {
            return Ok(Messages::empty());
        };
        let (bytes, count) = queue.lock().take();
        if count == 0 {
            return Ok(Messages::empty());
        }
        Ok(Messages::from_vec(codec::decode_all(&bytes, count)?))
    }

    fn read_vertex_messages(&self, pid: PartitionId, dest: &I) -> Result<Messages<M>> {
        let Some(partition) = self.partitions.get(&pid) else {
            return Ok(Messages::empty());
        };
        let Some(queue) = partition.get(dest) else {
            return Ok(Messages::empty());
        };
        let guard = queue.lock();
        if guard.is_empty() {
            return Ok(Messages::empty());
        }
        Ok(Messages::from_vec(codec::decode_all(
            guard.bytes(),
            guard.len(),
        )?))
    }

    fn has_messages_for_vertex(&self, pid: PartitionId, dest: &I) -> bool {
        self.partitions
            .get(&pid)
            .and_then(|p| p.get(dest).map(|q| !q.lock().is_empty()))
            .unwrap_or(false)
    }

    fn has_messages_for_partition(&self, pid: PartitionId) -> bool {
        self.partitions
            .get(&pid)
            .map(|p| p.iter().any(|q| !q.lock().is_empty()))
            .unwrap_or(false)
    }

    fn vertex_ids_with_messages(&self, pid: PartitionId) -> Vec<I> {
        self.partitions
            .get(&pid)
            .map(|p| {
                p.iter()
                    .filter(|q| !q.lock().is_empty())
                    .map(|q| q.key().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn clear_partition(&self, pid: PartitionId) {
        self.partitions.remove(&pid);
    }

    fn clear_all(&self) {
        self.partitions.clear();
    }
}
