//! Store lifecycle across superstep and phase boundaries.
//!
//! `ServerData` owns every inbound store a worker needs and rotates them at
//! the boundaries. Rotation is an explicit barrier step: no compute thread
//! runs while it happens, and the transport has been drained by the caller.
//!
//! - Synchronous BSP keeps an `incoming`/`current` pair: each superstep
//!   consumes exactly what the prior one produced, so the old current is
//!   cleared, incoming is promoted, and a fresh incoming is allocated.
//! - The asynchronous disciplines keep one `remote` and one `local` store
//!   for the whole phase; they are created on the transition into async
//!   mode and never swapped.
//! - Multi-phase jobs additionally keep next-phase remote/local stores,
//!   promoted wholesale on a phase change.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::id::{Payload, VertexId};
use crate::store::{self, MessageStore};
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

type StoreRef<I, M> = Arc<dyn MessageStore<I, M>>;

pub struct ServerData<I: VertexId, M: Payload> {
    need_all: bool,
    buffer_limit: usize,
    multi_phase: bool,
    current: RwLock<Option<StoreRef<I, M>>>,
    incoming: RwLock<Option<StoreRef<I, M>>>,
    remote: RwLock<Option<StoreRef<I, M>>>,
    local: RwLock<Option<StoreRef<I, M>>>,
    next_phase_remote: RwLock<Option<StoreRef<I, M>>>,
    next_phase_local: RwLock<Option<StoreRef<I, M>>>,
}

impl<I: VertexId, M: Payload> ServerData<I, M> {
    pub fn new(config: &EngineConfig) -> Self {
        let need_all = config.async_conf.need_all_msgs;
        let buffer_limit = config.vertex_buffer_limit();
        let fresh = || Some(store::new_store::<I, M>(need_all, buffer_limit));
        let is_async = config.is_async();
        Self {
            need_all,
            buffer_limit,
            multi_phase: config.async_conf.multi_phase,
            current: RwLock::new(if is_async { None } else { fresh() }),
            incoming: RwLock::new(if is_async { None } else { fresh() }),
            remote: RwLock::new(if is_async { fresh() } else { None }),
            local: RwLock::new(if is_async { fresh() } else { None }),
            next_phase_remote: RwLock::new(if is_async && config.async_conf.multi_phase {
                fresh()
            } else {
                None
            }),
            next_phase_local: RwLock::new(if is_async && config.async_conf.multi_phase {
                fresh()
            } else {
                None
            }),
        }
    }

    fn fresh(&self) -> StoreRef<I, M> {
        store::new_store::<I, M>(self.need_all, self.buffer_limit)
    }

    fn get(slot: &RwLock<Option<StoreRef<I, M>>>, name: &str) -> Result<StoreRef<I, M>> {
        slot.read()
            .clone()
            .ok_or_else(|| EngineError::StoreIo(format!("{name} store absent for this discipline")))
    }

    /// BSP read side for the running superstep.
    pub fn current_store(&self) -> Result<StoreRef<I, M>> {
        Self::get(&self.current, "current")
    }

    /// BSP write side; what the next superstep will consume.
    pub fn incoming_store(&self) -> Result<StoreRef<I, M>> {
        Self::get(&self.incoming, "incoming")
    }

    /// Async store fed by remote workers.
    pub fn remote_store(&self) -> Result<StoreRef<I, M>> {
        Self::get(&self.remote, "remote")
    }

    /// Async store fed by the local short-circuit.
    pub fn local_store(&self) -> Result<StoreRef<I, M>> {
        Self::get(&self.local, "local")
    }

    pub fn next_phase_remote_store(&self) -> Result<StoreRef<I, M>> {
        Self::get(&self.next_phase_remote, "next-phase remote")
    }

    pub fn next_phase_local_store(&self) -> Result<StoreRef<I, M>> {
        Self::get(&self.next_phase_local, "next-phase local")
    }

    /// BSP rotation. Caller guarantees no compute thread is running and the
    /// transport is quiet.
    pub fn rotate_bsp(&self) -> Result<()> {
        let mut current = self.current.write();
        let mut incoming = self.incoming.write();
        if let Some(old) = current.take() {
            old.clear_all();
        }
        *current = incoming.take();
        *incoming = Some(self.fresh());
        debug!("rotated BSP stores: incoming promoted to current");
        Ok(())
    }

    /// Phase change: promote next-phase stores and allocate fresh ones.
    pub fn advance_phase(&self) -> Result<()> {
        if !self.multi_phase {
            return Err(EngineError::UnsupportedConfig(
                "advance_phase on a single-phase job".into(),
            ));
        }
        let mut remote = self.remote.write();
        let mut local = self.local.write();
        let mut np_remote = self.next_phase_remote.write();
        let mut np_local = self.next_phase_local.write();
        *remote = np_remote.take();
        *local = np_local.take();
        *np_remote = Some(self.fresh());
        *np_local = Some(self.fresh());
        debug!("advanced phase: next-phase stores promoted");
        Ok(())
    }

    /// True when no store holds a message for `pid`: the worker-side half
    /// of the termination check.
    pub fn partition_is_quiet(&self, pid: crate::id::PartitionId) -> bool {
        for slot in [&self.current, &self.incoming, &self.remote, &self.local] {
            if let Some(store) = slot.read().clone() {
                if store.has_messages_for_partition(pid) {
                    return false;
                }
            }
        }
        true
    }
}
