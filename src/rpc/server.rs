use std::net::SocketAddr;

use super::{Dispatch, RpcCall, RpcResult, ServiceError};
use crate::codec::{from_bytes, to_bytes};
use crate::config::IpcConfig;
use crate::transport::{ChannelListener, ChannelServer, Response, TransportError};

/// Serves one contract dispatcher on a channel listener.
pub struct RpcServer {
    server: ChannelServer,
}

impl RpcServer {
    pub fn spawn<D: Dispatch>(listener: ChannelListener, dispatch: D) -> Self {
        let handler = move |request: &[u8]| {
            Response::reply(to_bytes(&handle_request(&dispatch, request)))
        };
        Self {
            server: ChannelServer::spawn("rpc", listener, handler),
        }
    }

    /// Binds the configured RPC port on loopback and starts serving.
    pub fn bind<D: Dispatch>(config: &IpcConfig, dispatch: D) -> Result<Self, TransportError> {
        let listener = ChannelListener::bind_loopback(config.rpc_port, config.max_frame_len)?;
        Ok(Self::spawn(listener, dispatch))
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
}

fn handle_request<D: Dispatch + ?Sized>(dispatch: &D, request: &[u8]) -> RpcResult {
    let call: RpcCall = match from_bytes(request) {
        Ok(call) => call,
        Err(e) => {
            tracing::warn!("Rejecting malformed RPC request: {}", e);
            return RpcResult::Err(ServiceError::InvalidArguments(format!(
                "malformed call: {}",
                e
            )));
        }
    };

    let result = dispatch.dispatch(&call);
    match &result {
        RpcResult::Ok(value) => tracing::debug!(
            method = call.method_id,
            args = call.arg_count(),
            result_len = value.len(),
            "RPC call served"
        ),
        RpcResult::Err(err) => tracing::debug!(
            method = call.method_id,
            error = %err,
            "RPC call failed"
        ),
    }
    result
}
