//! Overwrite-by-source message store for algorithms that need every
//! neighbour's latest message every pass.
//!
//! Each destination keeps at most one encoded payload per source vertex; a
//! later message from the same source replaces the earlier one. Reads do
//! not drain, since the next round overwrites. On the wire these messages
//! carry their source id prefixed to the payload.

use super::{MessageStore, Messages};
use crate::codec;
use crate::error::Result;
use crate::id::{Payload, PartitionId, VertexId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;

type BySource<I> = Mutex<HashMap<I, Vec<u8>>>;

pub struct LatestBySourceStore<I, M> {
    partitions: DashMap<PartitionId, DashMap<I, BySource<I>>>,
    _marker: PhantomData<fn() -> M>,
}

impl<I: VertexId, M: Payload> LatestBySourceStore<I, M> {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            _marker: PhantomData,
        }
    }

    fn overwrite(&self, pid: PartitionId, dest: I, source: I, payload: Vec<u8>) {
        let partition = self.partitions.entry(pid).or_default();
        let slot = partition.entry(dest).or_insert_with(|| Mutex::new(HashMap::new()));
        slot.lock().insert(source, payload);
    }

    fn decode_map(map: &HashMap<I, Vec<u8>>) -> Result<Messages<M>> {
        let mut out = Vec::with_capacity(map.len());
        for payload in map.values() {
            let (msg, _) = codec::decode::<M>(payload)?;
            out.push(msg);
        }
        Ok(Messages::from_vec(out))
    }
}

impl<I: VertexId, M: Payload> Default for LatestBySourceStore<I, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: VertexId, M: Payload> MessageStore<I, M> for LatestBySourceStore<I, M> {
    fn add_message(&self, pid: PartitionId, dest: &I, source: &I, msg: &M) -> Result<()> {
        let payload = codec::encode(msg)?;
        self.overwrite(pid, dest.clone(), source.clone(), payload);
        Ok(())
    }

    fn add_encoded_batch(&self, pid: PartitionId, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (dest_bytes, msg_bytes) in pairs {
            let (dest, _) = codec::decode::<I>(dest_bytes)?;
            // Wire layout for this store: encoded source id, then payload.
            let (source, used) = codec::decode::<I>(msg_bytes)?;
            self.overwrite(pid, dest, source, msg_bytes[used..].to_vec());
        }
        Ok(())
    }

    fn remove_vertex_messages(&self, pid: PartitionId, dest: &I) -> Result<Messages<M>> {
        let Some(partition) = self.partitions.get(&pid) else {
            return Ok(Messages::empty());
        };
        let Some(slot) = partition.get(dest) else {
            return Ok(Messages::empty());
        };
        let taken = std::mem::take(&mut *slot.lock());
        Self::decode_map(&taken)
    }

    fn read_vertex_messages(&self, pid: PartitionId, dest: &I) -> Result<Messages<M>> {
        let Some(partition) = self.partitions.get(&pid) else {
            return Ok(Messages::empty());
        };
        let Some(slot) = partition.get(dest) else {
            return Ok(Messages::empty());
        };
        let guard = slot.lock();
        Self::decode_map(&guard)
    }

    fn has_messages_for_vertex(&self, pid: PartitionId, dest: &I) -> bool {
        self.partitions
            .get(&pid)
            .and_then(|p| p.get(dest).map(|s| !s.lock().is_empty()))
            .unwrap_or(false)
    }

    fn has_messages_for_partition(&self, pid: PartitionId) -> bool {
        self.partitions
            .get(&pid)
            .map(|p| p.iter().any(|s| !s.lock().is_empty()))
            .unwrap_or(false)
    }

    fn vertex_ids_with_messages(&self, pid: PartitionId) -> Vec<I> {
        self.partitions
            .get(&pid)
            .map(|p| {
                p.iter()
                    .filter(|s| !s.lock().is_empty())
                    .map(|s| s.key().clone())
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
