//! Wire requests exchanged between workers.
//!
//! The byte layout is fixed within a cluster: a one-byte tag, big-endian
//! integer fields, and length-prefixed byte strings. The high bit of the
//! 32-bit partition id field marks a message bound for the next phase, so
//! valid partition ids occupy 31 bits.

use crate::error::{EngineError, Result};
use crate::id::{PartitionId, TaskId};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

/// High bit of the wire partition id: set when the payload targets the
/// next-phase stores.
pub const NEXT_PHASE_FLAG: u32 = 1 << 31;

const TAG_WORKER_MESSAGES: u8 = 1;
const TAG_TOKEN: u8 = 2;
const TAG_FORK: u8 = 3;
const TAG_GLOBAL_TOKEN: u8 = 4;
const TAG_PARTITION_TOKEN: u8 = 5;

/// One batch of encoded (destination id, message) pairs bound for a single
/// partition, phase flag included in the id field.
pub type MessageBatch = (u32, Vec<(Vec<u8>, Vec<u8>)>);

/// Requests the worker receive path understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Batched data messages for one or more partitions of the receiver.
    SendWorkerMessages { batches: Vec<MessageBatch> },
    /// Philosopher token (fork request) between two lock ordinals.
    SendToken { from: u64, to: u64 },
    /// Philosopher fork hand-off between two lock ordinals.
    SendFork { from: u64, to: u64 },
    /// Global token hand-off between two tasks.
    SendGlobalToken { from: TaskId, to: TaskId },
    /// Partition token hand-off within a worker's partition ring.
    SendPartitionToken { from: PartitionId, to: PartitionId },
}

/// Stamp the next-phase flag into a partition id for the wire.
pub fn wire_partition_id(pid: PartitionId, next_phase: bool) -> Result<u32> {
    if pid & NEXT_PHASE_FLAG != 0 {
        return Err(EngineError::WireFormat(format!(
            "partition id {pid} does not fit in 31 bits"
        )));
    }
    Ok(if next_phase { pid | NEXT_PHASE_FLAG } else { pid })
}

/// Split a wire partition id into (partition id, next-phase flag).
pub fn split_wire_partition_id(wire: u32) -> (PartitionId, bool) {
    (wire & !NEXT_PHASE_FLAG, wire & NEXT_PHASE_FLAG != 0)
}

impl WorkerRequest {
    pub fn encode(&self) -> Vec<u8> {
        // Writes to Vec cannot fail; unwraps here are infallible I/O.
        let mut out = Vec::new();
        match self {
            WorkerRequest::SendWorkerMessages { batches } => {
                out.write_u8(TAG_WORKER_MESSAGES).unwrap();
                out.write_u32::<BigEndian>(batches.len() as u32).unwrap();
                for (wire_pid, pairs) in batches {
                    out.write_u32::<BigEndian>(*wire_pid).unwrap();
                    out.write_u32::<BigEndian>(pairs.len() as u32).unwrap();
                    for (dest, msg) in pairs {
                        out.write_u32::<BigEndian>(dest.len() as u32).unwrap();
                        out.extend_from_slice(dest);
                        out.write_u32::<BigEndian>(msg.len() as u32).unwrap();
                        out.extend_from_slice(msg);
                    }
                }
            }
            WorkerRequest::SendToken { from, to } => {
                out.write_u8(TAG_TOKEN).unwrap();
                out.write_u64::<BigEndian>(*from).unwrap();
                out.write_u64::<BigEndian>(*to).unwrap();
            }
            WorkerRequest::SendFork { from, to } => {
                out.write_u8(TAG_FORK).unwrap();
                out.write_u64::<BigEndian>(*from).unwrap();
                out.write_u64::<BigEndian>(*to).unwrap();
            }
            WorkerRequest::SendGlobalToken { from, to } => {
                out.write_u8(TAG_GLOBAL_TOKEN).unwrap();
                out.write_u32::<BigEndian>(*from).unwrap();
                out.write_u32::<BigEndian>(*to).unwrap();
            }
            WorkerRequest::SendPartitionToken { from, to } => {
                out.write_u8(TAG_PARTITION_TOKEN).unwrap();
                out.write_u32::<BigEndian>(*from).unwrap();
                out.write_u32::<BigEndian>(*to).unwrap();
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = std::io::Cursor::new(bytes);
        let tag = read_u8(&mut cur)?;
        let req = match tag {
            TAG_WORKER_MESSAGES => {
                let batch_count = read_u32(&mut cur)? as usize;
                let mut batches = Vec::with_capacity(batch_count.min(1024));
                for _ in 0..batch_count {
                    let wire_pid = read_u32(&mut cur)?;
                    let pair_count = read_u32(&mut cur)? as usize;
                    let mut pairs = Vec::with_capacity(pair_count.min(4096));
                    for _ in 0..pair_count {
                        let dest = read_bytes(&mut cur, bytes.len())?;
                        let msg = read_bytes(&mut cur, bytes.len())?;
                        pairs.push((dest, msg));
                    }
                    batches.push((wire_pid, pairs));
                }
                WorkerRequest::SendWorkerMessages { batches }
            }
            TAG_TOKEN => WorkerRequest::SendToken {
                from: read_u64(&mut cur)?,
                to: read_u64(&mut cur)?,
            },
            TAG_FORK => WorkerRequest::SendFork {
                from: read_u64(&mut cur)?,
                to: read_u64(&mut cur)?,
            },
            TAG_GLOBAL_TOKEN => WorkerRequest::SendGlobalToken {
                from: read_u32(&mut cur)?,
                to: read_u32(&mut cur)?,
            },
            TAG_PARTITION_TOKEN => WorkerRequest::SendPartitionToken {
                from: read_u32(&mut cur)?,
                to: read_u32(&mut cur)?,
            },
            other => {
                return Err(EngineError::WireFormat(format!("unknown request tag {other}")));
            }
        };
        if cur.position() != bytes.len() as u64 {
            return Err(EngineError::WireFormat(format!(
                "{} trailing bytes after request",
                bytes.len() as u64 - cur.position()
            )));
        }
        Ok(req)
    }
}

fn read_u8(cur: &mut std::io::Cursor<&[u8]>) -> Result<u8> {
    cur.read_u8()
        .map_err(|e| EngineError::WireFormat(e.to_string()))
}

fn read_u32(cur: &mut std::io::Cursor<&[u8]>) -> Result<u32> {
    cur.read_u32::<BigEndian>()
        .map_err(|e| EngineError::WireFormat(e.to_string()))
}

fn read_u64(cur: &mut std::io::Cursor<&[u8]>) -> Result<u64> {
    cur.read_u64::<BigEndian>()
        .map_err(|e| EngineError::WireFormat(e.to_string()))
}

fn read_bytes(cur: &mut std::io::Cursor<&[u8]>, total: usize) -> Result<Vec<u8>> {
    let len = read_u32(cur)? as usize;
    let remaining = total.saturating_sub(cur.position() as usize);
    if len > remaining {
        return Err(EngineError::WireFormat(format!(
            "length prefix {len} exceeds remaining {remaining} bytes"
        )));
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)
        .map_err(|e| EngineError::WireFormat(e.to_string()))?;
    Ok(buf)
}
