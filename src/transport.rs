//! Transport seam and the in-memory fabric used by tests and the harness.
//!
//! The engine assumes a reliable unicast channel: [`Transport::send_request`]
//! is asynchronous fire-and-forget, [`Transport::wait_all_requests`] blocks
//! until every request this endpoint has issued was handled. The in-memory
//! [`LocalFabric`] honours that contract with one delivery thread per
//! endpoint; requests cross it in encoded form so the wire codec is on the
//! hot path exactly as it would be over a network.

use crate::error::{EngineError, Result};
use crate::id::TaskId;
use crate::wire::WorkerRequest;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

/// The worker-side receive path.
pub trait RequestHandler: Send + Sync {
    fn handle_request(&self, from: TaskId, req: WorkerRequest) -> Result<()>;
}

/// Reliable unicast message channel between tasks.
pub trait Transport: Send + Sync {
    /// Fire-and-forget send. Never blocks on the receiver.
    fn send_request(&self, dst: TaskId, req: WorkerRequest) -> Result<()>;

    /// Block until every outstanding request from this endpoint has been
    /// handled by its receiver.
    fn wait_all_requests(&self) -> Result<()>;
}

struct Envelope {
    from: TaskId,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct FabricState {
    senders: HashMap<TaskId, Sender<Envelope>>,
    receivers: HashMap<TaskId, Receiver<Envelope>>,
    pending: HashMap<TaskId, usize>,
    failure: Option<String>,
    threads: Vec<JoinHandle<()>>,
}

/// In-memory request fabric connecting a set of co-process endpoints.
pub struct LocalFabric {
    state: Mutex<FabricState>,
    quiesced: Condvar,
}

impl LocalFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FabricState::default()),
            quiesced: Condvar::new(),
        })
    }

    /// Create the endpoint for `task`. Must happen for every task before
    /// any of them starts sending.
    pub fn endpoint(self: &Arc<Self>, task: TaskId) -> LocalTransport {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock();
        state.senders.insert(task, tx);
        state.receivers.insert(task, rx);
        LocalTransport {
            task,
            fabric: Arc::clone(self),
        }
    }

    /// Attach the receive path for `task` and start its delivery thread.
    pub fn start(self: &Arc<Self>, task: TaskId, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let rx = {
            let mut state = self.state.lock();
            state.receivers.remove(&task).ok_or_else(|| {
                EngineError::Transport(format!("no endpoint registered for task {task}"))
            })?
        };
        let fabric = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name(format!("delivery-{task}"))
            .spawn(move || fabric.deliver_loop(task, rx, handler))
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        self.state.lock().threads.push(thread);
        Ok(())
    }

    fn deliver_loop(&self, task: TaskId, rx: Receiver<Envelope>, handler: Arc<dyn RequestHandler>) {
        while let Ok(env) = rx.recv() {
            let outcome = WorkerRequest::decode(&env.bytes)
                .and_then(|req| handler.handle_request(env.from, req));
            let mut state = self.state.lock();
            if let Err(e) = outcome {
                error!("task {task}: request from {} failed: {e}", env.from);
                state.failure.get_or_insert_with(|| e.to_string());
            }
            if let Some(count) = state.pending.get_mut(&env.from) {
                *count -= 1;
            }
            self.quiesced.notify_all();
        }
        debug!("task {task}: delivery thread draining done");
    }

    fn send_from(&self, from: TaskId, dst: TaskId, req: WorkerRequest) -> Result<()> {
        let bytes = req.encode();
        let mut state = self.state.lock();
        let sender = state
            .senders
            .get(&dst)
            .cloned()
            .ok_or_else(|| EngineError::Transport(format!("no endpoint for task {dst}")))?;
        *state.pending.entry(from).or_insert(0) += 1;
        drop(state);
        if sender.send(Envelope { from, bytes }).is_err() {
            let mut state = self.state.lock();
            if let Some(count) = state.pending.get_mut(&from) {
                *count -= 1;
            }
            self.quiesced.notify_all();
            return Err(EngineError::Transport(format!(
                "endpoint for task {dst} shut down"
            )));
        }
        Ok(())
    }

    fn wait_quiesced(&self, from: TaskId) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Some(msg) = &state.failure {
                return Err(EngineError::Transport(msg.clone()));
            }
            if state.pending.get(&from).copied().unwrap_or(0) == 0 {
                return Ok(());
            }
            self.quiesced.wait(&mut state);
        }
    }

    /// True once every endpoint's outstanding count is zero.
    pub fn is_quiet(&self) -> bool {
        let state = self.state.lock();
        state.pending.values().all(|&c| c == 0)
    }

    /// Drop all endpoints and join the delivery threads.
    pub fn shutdown(&self) {
        let threads = {
            let mut state = self.state.lock();
            state.senders.clear();
            state.receivers.clear();
            std::mem::take(&mut state.threads)
        };
        for t in threads {
            let _ = t.join();
        }
    }
}

/// One task's handle onto a [`LocalFabric`].
#[derive(Clone)]
pub struct LocalTransport {
    task: TaskId,
    fabric: Arc<LocalFabric>,
}

impl LocalTransport {
    pub fn task(&self) -> TaskId {
        self.task
    }
}

impl Transport for LocalTransport {
    fn send_request(&self, dst: TaskId, req: WorkerRequest) -> Result<()> {
        self.fabric.send_from(self.task, dst, req)
    }

    fn wait_all_requests(&self) -> Result<()> {
        self.fabric.wait_quiesced(self.task)
    }
}
