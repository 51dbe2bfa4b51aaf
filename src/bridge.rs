//! Host-process side: one event dispatcher plus the cookie client.

use crate::config::IpcConfig;
use crate::cookies::CookieControlsClient;
use crate::dispatch::{DispatchError, Dispatcher, DispatcherState};
use crate::ipc::{Event, Reply};
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("engine event channel unavailable: {0}")]
    Connect(#[from] TransportError),

    #[error("failed to start event dispatch: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Connection from the host to a running engine process.
pub struct EngineBridge {
    dispatcher: Dispatcher,
    cookies: CookieControlsClient,
}

impl EngineBridge {
    /// Connects both channels and starts dispatching.
    ///
    /// The event channel is required. If the RPC channel cannot be reached
    /// the bridge still comes up with a cookie client that fails fast.
    pub fn connect(config: &IpcConfig) -> Result<Self, BridgeError> {
        let dispatcher = Dispatcher::connect(config)?;
        dispatcher.start()?;

        let cookies = match CookieControlsClient::connect(config.rpc_addr(), config.channel_config())
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Cookie service unavailable, continuing without it: {}", e);
                CookieControlsClient::disconnected()
            }
        };

        tracing::info!(
            "Engine bridge {} connected to {}",
            &dispatcher.id()[..8],
            config.event_addr()
        );
        Ok(Self {
            dispatcher,
            cookies,
        })
    }

    pub fn id(&self) -> &str {
        self.dispatcher.id()
    }

    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Queues `event` fire-and-forget.
    pub fn send(&self, event: Event) -> Result<(), DispatchError> {
        self.dispatcher.send(event)
    }

    /// Queues `event`; `callback` later receives the engine's reply or the
    /// reason the event was lost.
    pub fn send_with_reply<F>(&self, event: Event, callback: F) -> Result<(), DispatchError>
    where
        F: FnOnce(Result<Reply, DispatchError>) + Send + 'static,
    {
        self.dispatcher.enqueue(event, callback)
    }

    pub fn cookies(&self) -> &CookieControlsClient {
        &self.cookies
    }

    /// Sends the shutdown event, stops dispatching and closes the cookie
    /// channel. Idempotent.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        self.cookies.disconnect();
    }
}

impl Drop for EngineBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::{Cookie, InMemoryCookieStore};
    use crate::engine::EngineEndpoint;
    use crate::rpc::RpcError;
    use crate::transport::{ChannelListener, DEFAULT_MAX_FRAME_LEN};
    use parking_lot::Mutex;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        endpoint: EngineEndpoint,
        seen: Arc<Mutex<Vec<Event>>>,
        config: IpcConfig,
    }

    fn engine() -> Harness {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let events = ChannelListener::bind_loopback(0, DEFAULT_MAX_FRAME_LEN).expect("bind events");
        let rpc = ChannelListener::bind_loopback(0, DEFAULT_MAX_FRAME_LEN).expect("bind rpc");
        let endpoint = EngineEndpoint::spawn(
            events,
            rpc,
            move |event: Event| {
                let reply = event.kind().as_bytes().to_vec();
                log.lock().push(event);
                reply
            },
            InMemoryCookieStore::new(),
            Duration::from_secs(2),
        );
        let config = IpcConfig {
            event_port: endpoint.event_addr().port(),
            rpc_port: endpoint.rpc_addr().port(),
            timeout_ms: 2_000,
            linger_ms: 100,
            ..IpcConfig::default()
        };
        Harness {
            endpoint,
            seen,
            config,
        }
    }

    #[test]
    fn events_reach_the_engine_in_order_and_shutdown_is_last() {
        let harness = engine();
        let bridge = EngineBridge::connect(&harness.config).expect("connect");

        bridge
            .send(Event::Navigate {
                url: "https://example.com".to_string(),
            })
            .expect("send");
        bridge.send(Event::Resize { width: 800, height: 600 }).expect("send");

        let (tx, rx) = crossbeam_channel::bounded(1);
        bridge
            .send_with_reply(Event::GoBack, move |result| {
                let _ = tx.send(result.map(Reply::into_bytes).map_err(|e| e.to_string()));
            })
            .expect("send");
        let reply = rx.recv_timeout(Duration::from_secs(5)).expect("callback");
        assert_eq!(reply.expect("reply"), b"go-back");

        bridge.shutdown();
        assert_eq!(bridge.state(), DispatcherState::Stopped);
        harness.endpoint.wait();

        let seen = harness.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                Event::Navigate {
                    url: "https://example.com".to_string()
                },
                Event::Resize { width: 800, height: 600 },
                Event::GoBack,
                Event::Shutdown,
            ]
        );
    }

    #[test]
    fn cookie_round_trip_through_the_engine() {
        let harness = engine();
        let bridge = EngineBridge::connect(&harness.config).expect("connect");
        let cookies = bridge.cookies();
        let url = "https://example.com/".to_string();

        let cookie = Cookie::new("sid", "42").with_domain("example.com").with_path("/");
        assert!(cookies.set(url.clone(), cookie.clone()).expect("set"));
        assert_eq!(cookies.get(url.clone(), "sid".to_string()).expect("get"), cookie);

        let err = cookies.get(url.clone(), "nope".to_string()).unwrap_err();
        assert!(err.is_not_found());

        cookies.delete(url.clone(), "sid".to_string()).expect("delete");
        assert!(cookies.get(url, "sid".to_string()).unwrap_err().is_not_found());
    }

    #[test]
    fn concurrent_cookie_callers_do_not_cross_talk() {
        let harness = engine();
        let bridge = Arc::new(EngineBridge::connect(&harness.config).expect("connect"));

        let callers: Vec<_> = (0..6)
            .map(|i| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    let url = format!("https://site{}.test/", i);
                    for j in 0..10 {
                        let cookie = Cookie::new(format!("c{}", i), format!("{}-{}", i, j));
                        assert!(bridge.cookies().set(url.clone(), cookie.clone()).expect("set"));
                        let got = bridge
                            .cookies()
                            .get(url.clone(), cookie.name.clone())
                            .expect("get");
                        assert_eq!(got, cookie);
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.join().expect("caller thread");
        }
    }

    #[test]
    fn unreachable_rpc_port_gives_a_fail_fast_cookie_client() {
        let harness = engine();
        let closed_port = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr")
            .port();
        let config = IpcConfig {
            rpc_port: closed_port,
            ..harness.config.clone()
        };

        let bridge = EngineBridge::connect(&config).expect("event channel still connects");
        assert!(!bridge.cookies().is_connected());
        assert!(matches!(
            bridge.cookies().get("https://example.com/".to_string(), "a".to_string()),
            Err(RpcError::Unavailable)
        ));
        bridge.send(Event::Ping).expect("events still flow");
    }

    #[test]
    fn unreachable_event_port_is_fatal() {
        let closed_port = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr")
            .port();
        let config = IpcConfig {
            event_port: closed_port,
            timeout_ms: 500,
            ..IpcConfig::default()
        };
        assert!(matches!(
            EngineBridge::connect(&config),
            Err(BridgeError::Connect(TransportError::Connect { .. }))
        ));
    }

    #[test]
    fn dropping_the_bridge_sends_shutdown_after_delivered_events() {
        let harness = engine();
        {
            let bridge = EngineBridge::connect(&harness.config).expect("connect");
            let (tx, rx) = crossbeam_channel::bounded(1);
            bridge
                .send_with_reply(Event::Ping, move |result| {
                    let _ = tx.send(result.is_ok());
                })
                .expect("send");
            assert!(rx.recv_timeout(Duration::from_secs(5)).expect("ping callback"));
        }
        harness.endpoint.wait();
        let seen = harness.seen.lock().clone();
        assert_eq!(seen, vec![Event::Ping, Event::Shutdown]);
    }

    #[test]
    fn events_still_queued_at_shutdown_are_cancelled() {
        let harness = engine();
        let bridge = EngineBridge::connect(&harness.config).expect("connect");

        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..50 {
            let tx = tx.clone();
            bridge
                .send_with_reply(Event::MouseMove { x: i, y: i }, move |result| {
                    let _ = tx.send(result.map_err(|e| e.to_string()));
                })
                .expect("send");
        }
        bridge.shutdown();
        drop(tx);

        let outcomes: Vec<_> = rx.iter().collect();
        assert_eq!(outcomes.len(), 50);
        let delivered = outcomes.iter().take_while(|r| r.is_ok()).count();
        assert!(outcomes[delivered..]
            .iter()
            .all(|r| r.as_ref().unwrap_err().contains("cancelled")));

        harness.endpoint.wait();
        let seen = harness.seen.lock().clone();
        assert_eq!(seen.len(), delivered + 1);
        assert_eq!(seen.last(), Some(&Event::Shutdown));
    }
}
