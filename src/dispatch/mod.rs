//! Ordered, single-worker delivery of events to the engine process.
//!
//! Callers enqueue [`Event`](crate::ipc::Event)s from any thread. One
//! dedicated thread drains the queue in FIFO order and performs exactly one
//! request/reply exchange per event, so at most one event is ever in flight.

mod dispatcher;
mod lifecycle;
mod queue;
mod worker;

pub use dispatcher::{Dispatcher, FailureHook};
pub use lifecycle::DispatcherState;
pub use queue::{EventQueue, PendingDispatch, ReplyCallback};

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher has already been started")]
    AlreadyStarted,

    #[error("dispatcher is stopping or stopped")]
    Stopped,

    #[error("shutdown events are only sent by Dispatcher::shutdown")]
    ShutdownReserved,

    #[error("event was cancelled by shutdown before it was sent")]
    Cancelled,

    #[error("event lost: {0}")]
    Transport(#[from] TransportError),
}
