use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::lifecycle::{DispatcherState, Lifecycle};
use super::queue::{EventQueue, PendingDispatch};
use super::worker::{finish, spawn_dispatch_thread, DispatchContext};
use super::DispatchError;
use crate::config::IpcConfig;
use crate::ipc::{Event, Reply};
use crate::transport::{Channel, RoundTrip, TransportError};

/// Observer for events lost to a send or receive failure.
pub type FailureHook = Arc<dyn Fn(&Event, &DispatchError) + Send + Sync>;

/// Host-side event dispatcher: a queue plus one dispatch thread driving one
/// transport.
pub struct Dispatcher {
    id: String,
    queue: Arc<EventQueue>,
    lifecycle: Arc<Lifecycle>,
    /// Held here until `start` hands it to the dispatch thread.
    transport: Mutex<Option<Box<dyn RoundTrip>>>,
    failure_hook: Arc<Mutex<Option<FailureHook>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn with_transport<T: RoundTrip + 'static>(transport: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            queue: Arc::new(EventQueue::new()),
            lifecycle: Arc::new(Lifecycle::new()),
            transport: Mutex::new(Some(Box::new(transport))),
            failure_hook: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Connects the event channel. A connect failure is fatal.
    pub fn connect(config: &IpcConfig) -> Result<Self, TransportError> {
        let channel = Channel::connect(config.event_addr(), config.channel_config())?;
        Ok(Self::with_transport(channel))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> DispatcherState {
        self.lifecycle.current()
    }

    /// Number of events waiting to be sent.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Called on the dispatch thread for every lost event, before the
    /// event's own callback.
    pub fn set_failure_hook<F>(&self, hook: F)
    where
        F: Fn(&Event, &DispatchError) + Send + Sync + 'static,
    {
        *self.failure_hook.lock() = Some(Arc::new(hook));
    }

    /// Starts the dispatch thread. Only legal once, from `Created`.
    pub fn start(&self) -> Result<(), DispatchError> {
        // Held across the transition so a concurrent `shutdown` that sees
        // `Running` always finds the handle to join.
        let mut worker = self.worker.lock();
        self.lifecycle
            .advance(DispatcherState::Running)
            .map_err(|state| match state {
                DispatcherState::Running => DispatchError::AlreadyStarted,
                _ => DispatchError::Stopped,
            })?;

        let Some(transport) = self.transport.lock().take() else {
            return Err(DispatchError::Stopped);
        };

        let handle = spawn_dispatch_thread(DispatchContext {
            id: self.id.clone(),
            queue: Arc::clone(&self.queue),
            lifecycle: Arc::clone(&self.lifecycle),
            transport,
            failure_hook: Arc::clone(&self.failure_hook),
        });
        *worker = Some(handle);
        Ok(())
    }

    /// Queues `event` without waiting. `callback` runs later on the dispatch
    /// thread with the raw reply or the reason the event was lost.
    pub fn enqueue<F>(&self, event: Event, callback: F) -> Result<(), DispatchError>
    where
        F: FnOnce(Result<Reply, DispatchError>) + Send + 'static,
    {
        self.push(PendingDispatch::new(event, Some(Box::new(callback))))
    }

    /// Fire-and-forget: failures are only logged.
    pub fn send(&self, event: Event) -> Result<(), DispatchError> {
        self.push(PendingDispatch::new(event, None))
    }

    fn push(&self, pending: PendingDispatch) -> Result<(), DispatchError> {
        if pending.event.is_shutdown() {
            return Err(DispatchError::ShutdownReserved);
        }
        self.queue.enqueue(pending)
    }

    /// Stops dequeuing, sends the final shutdown event, waits for its round
    /// trip and releases the transport.
    ///
    /// Idempotent and callable from any thread. From a callback on the
    /// dispatch thread it only closes the queue; the thread finishes the
    /// sequence itself.
    pub fn shutdown(&self) {
        let previous = match self.lifecycle.advance(DispatcherState::Stopping) {
            Ok(previous) => previous,
            Err(_) => return,
        };
        self.queue.close();

        match previous {
            DispatcherState::Created => {
                let transport = self.transport.lock().take();
                if let Some(transport) = transport {
                    finish(&self.id, &self.queue, &*transport);
                }
                let _ = self.lifecycle.advance(DispatcherState::Stopped);
            }
            _ => {
                let handle = self.worker.lock().take();
                if let Some(handle) = handle {
                    if handle.thread().id() == std::thread::current().id() {
                        return;
                    }
                    if handle.join().is_err() {
                        tracing::error!("Dispatcher {} thread panicked", &self.id[..8]);
                        let _ = self.lifecycle.advance(DispatcherState::Stopped);
                    }
                }
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
