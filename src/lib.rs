//! Inter-process bridge between a host application and an out-of-process
//! browser engine.
//!
//! The host side ([`EngineBridge`]) feeds input and navigation [`Event`]s to
//! the engine through a single ordered dispatch thread and talks to the
//! engine's cookie store through typed RPC stubs. The engine side
//! ([`EngineEndpoint`]) answers both channels.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod cookies;
pub mod dispatch;
pub mod engine;
pub mod ipc;
pub mod rpc;
pub mod transport;

pub use bridge::{BridgeError, EngineBridge};
pub use config::IpcConfig;
pub use cookies::{Cookie, CookieControls, CookieControlsClient, CookieService, CookieStore};
pub use dispatch::{DispatchError, Dispatcher, DispatcherState};
pub use engine::{EngineEndpoint, EventHandler, EventServer};
pub use ipc::{Event, Reply};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (usually
/// [`IpcConfig::log_filter`]) applies. Calling this more than once is
/// harmless.
pub fn init_logging(default_filter: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("uwb-bridge {} logging initialised", env!("CARGO_PKG_VERSION"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_twice_is_harmless() {
        init_logging("uwb_bridge=debug");
        init_logging("uwb_bridge=info");
    }
}
