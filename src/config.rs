//! Engine configuration.
//!
//! Mirrors the job-level options a deployment would set: execution
//! discipline, serialisability mode, cache sizing and superstep limits.
//! [`EngineConfig::validate`] performs the fail-fast checks; a worker
//! refuses to start on an unsupported combination rather than misbehave
//! mid-job.

use crate::error::{EngineError, Result};
use crate::id::VertexId;
use serde::{Deserialize, Serialize};

/// How vertices are shielded from concurrent neighbour updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializabilityMode {
    /// No coordination; every vertex computes every pass.
    None,
    /// Global + partition tokens circulated in fixed rings.
    Token,
    /// Hygienic dining philosophers per boundary vertex.
    VertexLock,
    /// Hygienic dining philosophers per partition.
    PartitionLock,
}

/// Options controlling the asynchronous execution disciplines.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AsyncConfig {
    /// Run asynchronously (AP); messages become visible within a superstep.
    pub is_async: bool,
    /// Barrierless asynchronous execution (BAP); implies `is_async`.
    pub disable_barriers: bool,
    /// The algorithm needs every neighbour's latest message every pass;
    /// enables overwrite-by-source message semantics.
    pub need_all_msgs: bool,
    /// The job switches computations at phase boundaries.
    pub multi_phase: bool,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            is_async: false,
            disable_barriers: false,
            need_all_msgs: false,
            multi_phase: false,
        }
    }
}

/// Worker-side engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Vertices vote to halt unconditionally once the logical superstep
    /// count reaches this limit.
    pub max_supersteps: u64,
    /// Number of compute threads drawing partitions from the shared queue.
    pub compute_threads: usize,
    /// Asynchronous-discipline options.
    pub async_conf: AsyncConfig,
    /// Serialisability discipline.
    pub serializability: SerializabilityMode,
    /// Flush threshold for the per-destination-worker outgoing cache.
    pub max_message_bytes_per_worker: usize,
    /// Extra headroom reserved when a cache bucket is first allocated, so a
    /// send landing near the threshold does not immediately reallocate.
    pub initial_cache_slack: usize,
    /// Per-vertex inbound buffer cap. Appends past this fail with
    /// `PayloadTooLarge` unless `use_big_buffers` is set.
    pub max_vertex_buffer_bytes: usize,
    /// Lift the per-vertex buffer cap entirely.
    pub use_big_buffers: bool,
    /// Permit vertex removal/addition signals from user computations.
    pub allow_graph_mutation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let threads = num_cpus::get().max(1);
        Self {
            max_supersteps: 100,
            compute_threads: threads,
            async_conf: AsyncConfig::default(),
            serializability: SerializabilityMode::None,
            max_message_bytes_per_worker: 512 * 1024,
            initial_cache_slack: 16 * 1024,
            max_vertex_buffer_bytes: i32::MAX as usize,
            use_big_buffers: false,
            allow_graph_mutation: false,
        }
    }
}

impl EngineConfig {
    /// Effective per-vertex inbound buffer cap.
    pub fn vertex_buffer_limit(&self) -> usize {
        if self.use_big_buffers {
            usize::MAX
        } else {
            self.max_vertex_buffer_bytes
        }
    }

    /// True when the job runs one of the asynchronous disciplines.
    pub fn is_async(&self) -> bool {
        self.async_conf.is_async || self.async_conf.disable_barriers
    }

    /// Reject combinations the engine cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedConfig`] when:
    /// - a serialisability discipline is requested under pure BSP;
    /// - barrierless execution or multi-phase is requested without async;
    /// - a philosophers discipline is requested for ids without an integer
    ///   ordinal;
    /// - graph mutation is combined with a serialisability discipline (the
    ///   lock tables assume a fixed undirected graph).
    pub fn validate<I: VertexId>(&self) -> Result<()> {
        if self.serializability != SerializabilityMode::None && !self.is_async() {
            return Err(EngineError::UnsupportedConfig(format!(
                "{:?} serialisability requires an asynchronous discipline, not pure BSP",
                self.serializability
            )));
        }
        if self.async_conf.disable_barriers && !self.async_conf.is_async {
            return Err(EngineError::UnsupportedConfig(
                "disable_barriers requires is_async".into(),
            ));
        }
        if self.async_conf.multi_phase && !self.is_async() {
            return Err(EngineError::UnsupportedConfig(
                "multi_phase jobs require an asynchronous discipline".into(),
            ));
        }
        let needs_ordinals = matches!(
            self.serializability,
            SerializabilityMode::VertexLock | SerializabilityMode::PartitionLock
        );
        if needs_ordinals && !I::HAS_LOCK_ORDINAL {
            return Err(EngineError::UnsupportedConfig(
                "lock serialisability requires fixed-width integer vertex ids".into(),
            ));
        }
        if self.allow_graph_mutation && self.serializability != SerializabilityMode::None {
            return Err(EngineError::UnsupportedConfig(
                "graph mutation is not supported under a serialisability discipline".into(),
            ));
        }
        if self.compute_threads == 0 {
            return Err(EngineError::UnsupportedConfig(
                "compute_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
