//! Vertex identifiers and payload bounds.
//!
//! Every id and payload that crosses a worker boundary must be serialisable;
//! the engine is otherwise agnostic to what user code stores in a vertex.
//! [`VertexId`] is implemented for the fixed-width integer types and for
//! byte-string ids (`String`, `Vec<u8>`). Integer ids additionally expose a
//! [`lock_ordinal`](VertexId::lock_ordinal), which the dining-philosophers
//! layer uses to key and order its per-edge fork state; configurations that
//! require philosophers are rejected for id types without one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;

/// A partition identifier. Valid values occupy 31 bits; the high bit is
/// reserved on the wire for the next-phase flag.
pub type PartitionId = u32;

/// Identifies a worker process within the job.
pub type WorkerId = u32;

/// Identifies a transport endpoint. One task per worker.
pub type TaskId = u32;

/// Bound for vertex identifiers.
///
/// Ids are compared with `Ord` when the engine needs a deterministic
/// tie-break, hashed for store keying, and encoded with the message codec
/// when they travel between workers.
pub trait VertexId:
    Clone + Eq + Ord + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Whether this id type has a stable integer ordinal.
    const HAS_LOCK_ORDINAL: bool;

    /// Stable integer ordinal for lock-table keying, or `None` for
    /// byte-string ids.
    ///
    /// Two workers must derive the same ordinal for the same id; the
    /// ordinal's ordering (not the type's `Ord`) decides initial fork
    /// placement between philosophers.
    fn lock_ordinal(&self) -> Option<u64>;
}

macro_rules! integer_vertex_id {
    ($($t:ty),*) => {
        $(impl VertexId for $t {
            const HAS_LOCK_ORDINAL: bool = true;

            fn lock_ordinal(&self) -> Option<u64> {
                Some(*self as u64)
            }
        })*
    };
}

integer_vertex_id!(u16, u32, u64, i16, i32, i64);

impl VertexId for String {
    const HAS_LOCK_ORDINAL: bool = false;

    fn lock_ordinal(&self) -> Option<u64> {
        None
    }
}

impl VertexId for Vec<u8> {
    const HAS_LOCK_ORDINAL: bool = false;

    fn lock_ordinal(&self) -> Option<u64> {
        None
    }
}

/// Bound for vertex values, edge values and message values.
///
/// Blanket-implemented; user types only need `Clone + Debug + serde`.
pub trait Payload: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}
