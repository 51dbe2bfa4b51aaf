use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{RpcCall, RpcError, RpcResult};
use crate::codec::{from_bytes, to_bytes};
use crate::transport::{Channel, ChannelConfig, TransportError};

/// Connection used by generated client stubs.
///
/// Calls from several threads are serialized here, one full request/reply
/// exchange at a time. Once the channel fails for good the client stays
/// disconnected and every call fails fast.
pub struct RpcClient {
    channel: Mutex<Option<Channel>>,
    connected: AtomicBool,
}

impl RpcClient {
    pub fn connect(addr: SocketAddr, config: ChannelConfig) -> Result<Self, TransportError> {
        let channel = Channel::connect(addr, config)?;
        Ok(Self {
            channel: Mutex::new(Some(channel)),
            connected: AtomicBool::new(true),
        })
    }

    pub fn disconnected() -> Self {
        Self {
            channel: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the channel. Idempotent.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    /// Performs one call and returns the encoded return value.
    pub fn call(&self, call: &RpcCall) -> Result<Vec<u8>, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::Unavailable);
        }

        let mut slot = self.channel.lock();
        let Some(channel) = slot.as_ref() else {
            return Err(RpcError::Unavailable);
        };

        let response = match channel.round_trip(&to_bytes(call)) {
            Ok(response) => response,
            Err(err) => {
                if !channel.is_open() {
                    tracing::warn!(
                        "RPC channel to {} lost during method {}: {}",
                        channel.peer_addr(),
                        call.method_id,
                        err
                    );
                    self.connected.store(false, Ordering::SeqCst);
                    slot.take();
                }
                return Err(err.into());
            }
        };
        drop(slot);

        let result: RpcResult = from_bytes(&response)?;
        Ok(result.into_result()?)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
