use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatcher::FailureHook;
use super::lifecycle::{DispatcherState, Lifecycle};
use super::queue::{EventQueue, PendingDispatch};
use super::DispatchError;
use crate::codec::to_bytes;
use crate::ipc::{Event, Reply};
use crate::transport::RoundTrip;

/// Everything the dispatch thread owns for its lifetime.
pub(crate) struct DispatchContext {
    pub(crate) id: String,
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) transport: Box<dyn RoundTrip>,
    pub(crate) failure_hook: Arc<Mutex<Option<FailureHook>>>,
}

/// Spawn the dispatch thread.
///
/// The thread drains the queue until it is closed, then cancels whatever is
/// left, sends the final shutdown event and releases the transport.
pub(crate) fn spawn_dispatch_thread(ctx: DispatchContext) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("uwb-dispatch-{}", &ctx.id[..8]))
        .spawn(move || run(ctx))
        .expect("Failed to spawn event dispatch thread")
}

fn run(ctx: DispatchContext) {
    tracing::info!("Dispatcher {} started", &ctx.id[..8]);

    while let Some(pending) = ctx.queue.wait_dequeue() {
        dispatch_one(&ctx.id, &*ctx.transport, &ctx.failure_hook, pending);
    }

    finish(&ctx.id, &ctx.queue, &*ctx.transport);
    let _ = ctx.lifecycle.advance(DispatcherState::Stopped);
}

/// One send/receive cycle. Failures are not retried or requeued.
pub(crate) fn dispatch_one(
    id: &str,
    transport: &dyn RoundTrip,
    failure_hook: &Mutex<Option<FailureHook>>,
    pending: PendingDispatch,
) {
    let request = to_bytes(&pending.event);
    match transport.round_trip(&request) {
        Ok(reply) => {
            tracing::debug!(
                dispatcher = %&id[..8],
                event = pending.event.kind(),
                reply_len = reply.len(),
                "Event acknowledged"
            );
            let kind = pending.event.kind();
            guarded(id, "reply callback", kind, || {
                pending.complete(Ok(Reply::new(reply)))
            });
        }
        Err(err) => {
            tracing::warn!(
                "Dispatcher {} lost {} event: {}",
                &id[..8],
                pending.event.kind(),
                err
            );
            let err = DispatchError::Transport(err);
            let kind = pending.event.kind();
            let hook = failure_hook.lock().clone();
            if let Some(hook) = hook {
                guarded(id, "failure hook", kind, || hook(&pending.event, &err));
            }
            guarded(id, "reply callback", kind, || pending.complete(Err(err)));
        }
    }
}

/// Cancels leftovers, sends the one shutdown event and closes the transport.
pub(crate) fn finish(id: &str, queue: &EventQueue, transport: &dyn RoundTrip) {
    let leftovers = queue.drain();
    if !leftovers.is_empty() {
        tracing::info!(
            "Dispatcher {} cancelling {} queued events",
            &id[..8],
            leftovers.len()
        );
    }
    for pending in leftovers {
        let kind = pending.event.kind();
        guarded(id, "reply callback", kind, || {
            pending.complete(Err(DispatchError::Cancelled))
        });
    }

    if transport.is_open() {
        match transport.round_trip(&to_bytes(&Event::Shutdown)) {
            Ok(_) => tracing::info!("Dispatcher {} delivered shutdown", &id[..8]),
            Err(e) => tracing::warn!("Dispatcher {} shutdown not acknowledged: {}", &id[..8], e),
        }
    } else {
        tracing::warn!(
            "Dispatcher {} transport already closed; shutdown not sent",
            &id[..8]
        );
    }

    transport.close();
    tracing::info!("Dispatcher {} stopped", &id[..8]);
}

/// Runs user code on the dispatch thread. A panic is logged and swallowed so
/// the loop keeps serving the queue.
fn guarded<F: FnOnce()>(id: &str, what: &str, event: &str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(
            "Dispatcher {} {} panicked on {} event; continuing",
            &id[..8],
            what,
            event
        );
    }
}
