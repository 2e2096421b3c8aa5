//! The user-facing computation seam.
//!
//! A [`Computation`] is invoked once per active vertex per logical
//! superstep with that vertex's inbound messages. The vertex is exclusively
//! owned for the call; sends go through the [`ComputeContext`], which
//! routes them into the cache or the local short-circuit. The message
//! iterable is single-pass and valid only during the call.

use crate::cache::RequestProcessor;
use crate::error::{EngineError, Result};
use crate::graph::{Vertex, VertexChangeLog};
use crate::id::{Payload, VertexId};
use crate::store::Messages;

pub trait Computation: Send + Sync + 'static {
    type Id: VertexId;
    type Value: Payload;
    type Edge: Payload;
    type Message: Payload;

    fn compute(
        &self,
        ctx: &mut ComputeContext<'_, Self>,
        vertex: &mut Vertex<Self::Id, Self::Value, Self::Edge>,
        messages: Messages<Self::Message>,
    ) -> Result<()>;
}

/// Per-invocation view of the engine handed to user code.
pub struct ComputeContext<'a, C: Computation + ?Sized> {
    processor: &'a mut RequestProcessor<C::Id, C::Message>,
    changes: &'a VertexChangeLog<C::Id>,
    allow_mutation: bool,
    superstep: u64,
    phase: u32,
    source: C::Id,
}

impl<'a, C: Computation + ?Sized> ComputeContext<'a, C> {
    pub(crate) fn new(
        processor: &'a mut RequestProcessor<C::Id, C::Message>,
        changes: &'a VertexChangeLog<C::Id>,
        allow_mutation: bool,
        superstep: u64,
        phase: u32,
        source: C::Id,
    ) -> Self {
        Self {
            processor,
            changes,
            allow_mutation,
            superstep,
            phase,
            source,
        }
    }

    /// Logical superstep visible to user code.
    pub fn superstep(&self) -> u64 {
        self.superstep
    }

    /// Current phase of a multi-phase job; 0 otherwise.
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Send a message for delivery in the next superstep (or, under an
    /// asynchronous discipline, as soon as the destination next computes).
    pub fn send_message(&mut self, dest: &C::Id, msg: &C::Message) -> Result<()> {
        self.processor.send_message(&self.source, dest, msg, false)
    }

    /// Send a message that only becomes visible after the next phase
    /// change.
    pub fn send_message_next_phase(&mut self, dest: &C::Id, msg: &C::Message) -> Result<()> {
        self.processor.send_message(&self.source, dest, msg, true)
    }

    /// Send `msg` along every out-edge of `vertex`.
    pub fn send_message_to_all_edges(
        &mut self,
        vertex: &Vertex<C::Id, C::Value, C::Edge>,
        msg: &C::Message,
    ) -> Result<()> {
        self.processor.send_message_to_all_edges(vertex, msg, false)
    }

    /// Signal removal of a vertex at the next superstep boundary.
    pub fn remove_vertex(&mut self, id: C::Id) -> Result<()> {
        if !self.allow_mutation {
            return Err(EngineError::UnsupportedConfig(
                "vertex removal requires allow_graph_mutation".into(),
            ));
        }
        self.changes.signal_removal(id);
        Ok(())
    }
}
