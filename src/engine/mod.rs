//! Engine-process side of the bridge: answers events and hosts the cookie
//! service.

use std::net::SocketAddr;
use std::time::Duration;

use crate::codec::from_bytes;
use crate::config::IpcConfig;
use crate::cookies::{CookieControlsServer, CookieService, CookieStore};
use crate::ipc::Event;
use crate::rpc::RpcServer;
use crate::transport::{ChannelListener, ChannelServer, Response, TransportError};

/// Applies one event inside the engine and produces its reply bytes.
pub trait EventHandler: Send + 'static {
    fn on_event(&mut self, event: Event) -> Vec<u8>;
}

impl<F> EventHandler for F
where
    F: FnMut(Event) -> Vec<u8> + Send + 'static,
{
    fn on_event(&mut self, event: Event) -> Vec<u8> {
        self(event)
    }
}

/// Serves the event channel until the host sends [`Event::Shutdown`].
pub struct EventServer {
    server: ChannelServer,
}

impl EventServer {
    pub fn spawn<H: EventHandler>(listener: ChannelListener, mut handler: H) -> Self {
        let server = ChannelServer::spawn("events", listener, move |request: &[u8]| {
            handle_event_frame(&mut handler, request)
        });
        Self { server }
    }

    /// Binds the configured event port on loopback.
    pub fn bind<H: EventHandler>(config: &IpcConfig, handler: H) -> Result<Self, TransportError> {
        let listener = ChannelListener::bind_loopback(config.event_port, config.max_frame_len)?;
        Ok(Self::spawn(listener, handler))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    pub fn stop(&mut self) {
        self.server.stop();
    }

    /// Blocks until the host has sent its shutdown event.
    pub fn wait(self) {
        self.server.join();
    }
}

fn handle_event_frame<H: EventHandler>(handler: &mut H, request: &[u8]) -> Response {
    let event: Event = match from_bytes(request) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                "Dropping undecodable event frame ({} bytes): {}",
                request.len(),
                e
            );
            return Response::reply(Vec::new());
        }
    };

    tracing::debug!(event = event.kind(), "Event received");
    let shutdown = event.is_shutdown();
    let reply = handler.on_event(event);
    if shutdown {
        tracing::info!("Shutdown event received, closing event channel");
        Response::reply_and_stop(reply)
    } else {
        Response::reply(reply)
    }
}

/// Both engine-side servers: events and the cookie RPC service.
pub struct EngineEndpoint {
    events: EventServer,
    rpc: RpcServer,
}

impl EngineEndpoint {
    /// Binds both configured ports and starts serving.
    pub fn bind<H, S>(config: &IpcConfig, handler: H, store: S) -> Result<Self, TransportError>
    where
        H: EventHandler,
        S: CookieStore,
    {
        let event_listener =
            ChannelListener::bind_loopback(config.event_port, config.max_frame_len)?;
        let rpc_listener =
            ChannelListener::bind_loopback(config.rpc_port, config.max_frame_len)?;
        Ok(Self::spawn(
            event_listener,
            rpc_listener,
            handler,
            store,
            config.timeout(),
        ))
    }

    /// Starts serving on already bound listeners. `store_timeout` bounds
    /// every cookie store operation.
    pub fn spawn<H, S>(
        event_listener: ChannelListener,
        rpc_listener: ChannelListener,
        handler: H,
        store: S,
        store_timeout: Duration,
    ) -> Self
    where
        H: EventHandler,
        S: CookieStore,
    {
        let cookies = CookieControlsServer::new(CookieService::new(store, store_timeout));
        let rpc = RpcServer::spawn(rpc_listener, cookies);
        let events = EventServer::spawn(event_listener, handler);
        tracing::info!(
            "Engine endpoint serving events on {} and cookies on {}",
            events.local_addr(),
            rpc.local_addr()
        );
        Self { events, rpc }
    }

    pub fn event_addr(&self) -> SocketAddr {
        self.events.local_addr()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    /// Blocks until the host shuts the event channel down, then stops the
    /// RPC server.
    pub fn wait(self) {
        let Self { events, mut rpc } = self;
        events.wait();
        rpc.stop();
    }

    pub fn stop(&mut self) {
        self.events.stop();
        self.rpc.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_bytes;
    use crate::transport::{Channel, ChannelConfig, DEFAULT_MAX_FRAME_LEN};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn config() -> ChannelConfig {
        ChannelConfig {
            timeout: Duration::from_secs(2),
            linger: Duration::from_millis(50),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    fn recording_server() -> (EventServer, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let listener = ChannelListener::bind_loopback(0, DEFAULT_MAX_FRAME_LEN).expect("bind");
        let server = EventServer::spawn(listener, move |event: Event| {
            let reply = event.kind().as_bytes().to_vec();
            log.lock().push(event);
            reply
        });
        (server, seen)
    }

    #[test]
    fn replies_with_handler_bytes() {
        let (mut server, seen) = recording_server();
        let channel = Channel::connect(server.local_addr(), config()).expect("connect");

        let reply = channel
            .round_trip(&to_bytes(&Event::MouseMove { x: 3, y: 4 }))
            .expect("reply");
        assert_eq!(reply, b"mouse-move");
        assert_eq!(seen.lock().as_slice(), &[Event::MouseMove { x: 3, y: 4 }]);
        server.stop();
    }

    #[test]
    fn undecodable_frame_gets_an_empty_reply() {
        let (mut server, seen) = recording_server();
        let channel = Channel::connect(server.local_addr(), config()).expect("connect");

        assert!(channel.round_trip(&[200]).expect("reply").is_empty());
        assert_eq!(channel.round_trip(&to_bytes(&Event::Ping)).expect("reply"), b"ping");
        assert_eq!(seen.lock().len(), 1);
        server.stop();
    }

    #[test]
    fn shutdown_event_ends_serving() {
        let (server, seen) = recording_server();
        let channel = Channel::connect(server.local_addr(), config()).expect("connect");

        channel.round_trip(&to_bytes(&Event::Refresh)).expect("reply");
        channel.round_trip(&to_bytes(&Event::Shutdown)).expect("reply");
        server.wait();

        assert_eq!(seen.lock().last(), Some(&Event::Shutdown));
        assert!(channel.round_trip(&to_bytes(&Event::Ping)).is_err());
    }
}
