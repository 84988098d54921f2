//! Delegation lock: a single server thread runs every critical section on behalf of its
//! clients.
//!
//! Clients never contend on the protected data. They push a closure onto a FIFO queue and wait on
//! a one-shot [`Completion`] that the server fulfils after running it. The queue is the only
//! place a conventional lock is used, and it is never held while work runs.
//!
//! The queue is unbounded: producers that outpace the server grow it without limit.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};

/// What happens to tasks still queued when shutdown begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Run everything that was accepted before shutdown.
    #[default]
    Drain,
    /// Drop queued tasks; their waiters observe [`Error::Discarded`].
    Discard,
}

type Outcome<R> = std::thread::Result<R>;

/// A queued critical section. Running it fulfils the submitter's completion signal.
struct Task {
    work: Box<dyn FnOnce() + Send>,
}

impl Task {
    fn new<F, R>(work: F) -> (Self, Completion<R>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded::<Outcome<R>>(1);
        let work = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work));
            // The submitter may have dropped its completion
            let _ = tx.send(outcome);
        });
        (Self { work }, Completion { rx })
    }

    fn run(self) {
        (self.work)()
    }
}

struct State {
    tasks: VecDeque<Task>,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
    policy: ShutdownPolicy,
}

/// One-shot handle to the result of a submitted task.
#[must_use = "a completion does nothing unless waited on"]
#[derive(Debug)]
pub struct Completion<R> {
    rx: Receiver<Outcome<R>>,
}

impl<R> Completion<R> {
    /// Blocks until the server has run the task.
    pub fn wait(self) -> Result<R> {
        match self.rx.recv() {
            Ok(outcome) => unpack(outcome),
            Err(_) => Err(Error::Discarded),
        }
    }

    /// Returns `Ok(None)` while the task is still queued or running.
    pub fn try_wait(&self) -> Result<Option<R>> {
        match self.rx.try_recv() {
            Ok(outcome) => unpack(outcome).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Discarded),
        }
    }
}

fn unpack<R>(outcome: Outcome<R>) -> Result<R> {
    outcome.map_err(|payload| Error::WorkPanicked {
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Configures and starts a [`Delegation`].
#[derive(Debug, Clone)]
pub struct Builder {
    name: String,
    policy: ShutdownPolicy,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            name: "delegation-server".to_owned(),
            policy: ShutdownPolicy::default(),
        }
    }
}

impl Builder {
    /// Name of the server thread.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn spawn(self) -> Result<Delegation> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
            policy: self.policy,
        });
        let server = thread::Builder::new().name(self.name.clone()).spawn({
            let shared = shared.clone();
            move || serve(&shared)
        })?;
        debug!(name = %self.name, policy = ?self.policy, "delegation server started");
        Ok(Delegation {
            shared,
            server_id: server.thread().id(),
            server: Mutex::new(Some(server)),
        })
    }
}

/// Lock substitute that funnels every critical section to one server thread.
///
/// Tasks run one at a time in the order their `submit` calls took the queue lock.
pub struct Delegation {
    shared: Arc<Shared>,
    server_id: ThreadId,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Delegation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegation")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .field("policy", &self.shared.policy)
            .finish()
    }
}

impl Delegation {
    pub fn new() -> Result<Self> {
        Self::builder().spawn()
    }

    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Queues `work` for the server.
    ///
    /// Fails with [`Error::ShutDown`] once [`Delegation::shutdown`] has begun; the work is then
    /// dropped without running.
    pub fn submit<F, R>(&self, work: F) -> Result<Completion<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, completion) = Task::new(work);
        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(Error::ShutDown);
        }
        state.tasks.push_back(task);
        self.shared.available.notify_one();
        Ok(completion)
    }

    /// Runs `work` on the server and waits for its result.
    pub fn delegate<F, R>(&self, work: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(work)?.wait()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Tasks accepted but not yet started.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Stops accepting work and joins the server. Idempotent.
    ///
    /// Queued tasks are run or discarded according to the [`ShutdownPolicy`]. Called from inside
    /// a task, it only stops intake; the server exits after that task returns.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                state.running = false;
                debug!(pending = state.tasks.len(), "delegation shutdown requested");
            }
            self.shared.available.notify_all();
        }

        if thread::current().id() == self.server_id {
            return;
        }
        // Held across the join so a concurrent caller also returns only after the server exits
        let mut server = self.server.lock();
        if let Some(handle) = server.take() {
            if handle.join().is_err() {
                error!("delegation server thread panicked");
            }
        }
    }
}

impl Drop for Delegation {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(shared: &Shared) {
    let mut executed = 0u64;
    loop {
        let task = {
            let mut state = shared.state.lock();
            while state.tasks.is_empty() && state.running {
                shared.available.wait(&mut state);
            }
            if !state.running && shared.policy == ShutdownPolicy::Discard {
                let discarded = std::mem::take(&mut state.tasks);
                drop(state);
                if !discarded.is_empty() {
                    warn!(count = discarded.len(), "discarding queued tasks on shutdown");
                }
                break;
            }
            match state.tasks.pop_front() {
                Some(task) => task,
                None => break,
            }
        };
        task.run();
        executed += 1;
        trace!(executed, "delegated task done");
    }
    debug!(executed, "delegation server stopped");
}
