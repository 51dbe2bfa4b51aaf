//! Typed request/response services over a dedicated channel.
//!
//! A service contract declared with [`rpc_service!`](crate::rpc_service)
//! expands to a trait, a client stub that marshals each method into an
//! [`RpcCall`], and a server dispatcher that resolves the method id, runs the
//! implementation and marshals the [`RpcResult`].

mod client;
mod macros;
mod server;

pub use client::RpcClient;
pub use server::RpcServer;

use crate::codec::{from_bytes, Decode, DecodeError, Encode, WireReader, WireWriter};
use crate::transport::TransportError;

/// Domain failure raised by a service implementation or by the dispatcher.
/// Travels back to the caller inside [`RpcResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown method id {0}")]
    UnknownMethod(u16),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// What a client stub call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc channel is not connected")]
    Unavailable,

    #[error("rpc transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed rpc response: {0}")]
    Decode(#[from] DecodeError),

    #[error("remote call failed: {0}")]
    Service(#[from] ServiceError),
}

impl RpcError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::Service(ServiceError::NotFound(_)))
    }
}

/// One method invocation: method id plus the encoded arguments in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    pub method_id: u16,
    args: Vec<Vec<u8>>,
}

/// The wire carries the argument count as a `u16`.
pub const MAX_ARGS: usize = u16::MAX as usize;

impl RpcCall {
    pub fn new(method_id: u16, args: Vec<Vec<u8>>) -> Result<Self, ServiceError> {
        if args.len() > MAX_ARGS {
            return Err(ServiceError::InvalidArguments(format!(
                "{} arguments exceed the limit of {}",
                args.len(),
                MAX_ARGS
            )));
        }
        Ok(Self { method_id, args })
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn args(&self) -> Arguments<'_> {
        Arguments {
            iter: self.args.iter(),
            index: 0,
        }
    }
}

/// Decodes call arguments one at a time, in declaration order.
pub struct Arguments<'a> {
    iter: std::slice::Iter<'a, Vec<u8>>,
    index: usize,
}

impl Arguments<'_> {
    pub fn next_arg<T: Decode>(&mut self) -> Result<T, ServiceError> {
        let index = self.index;
        self.index += 1;
        let raw = self
            .iter
            .next()
            .ok_or_else(|| ServiceError::InvalidArguments(format!("missing argument {}", index)))?;
        from_bytes(raw)
            .map_err(|e| ServiceError::InvalidArguments(format!("argument {}: {}", index, e)))
    }

    /// Rejects calls carrying more arguments than the method declares.
    pub fn finish(self) -> Result<(), ServiceError> {
        match self.iter.len() {
            0 => Ok(()),
            extra => Err(ServiceError::InvalidArguments(format!(
                "{} unexpected extra arguments",
                extra
            ))),
        }
    }
}

/// Outcome of one call: the encoded return value or a [`ServiceError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResult {
    Ok(Vec<u8>),
    Err(ServiceError),
}

impl RpcResult {
    pub fn into_result(self) -> Result<Vec<u8>, ServiceError> {
        match self {
            RpcResult::Ok(value) => Ok(value),
            RpcResult::Err(err) => Err(err),
        }
    }
}

/// Server side of a contract: maps a call to a result.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, call: &RpcCall) -> RpcResult;
}

impl Encode for RpcCall {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_u16(self.method_id);
        // Bounded by `RpcCall::new`; decoded calls are bounded by the wire.
        let count = u16::try_from(self.args.len()).unwrap_or(u16::MAX);
        writer.write_u16(count);
        for arg in self.args.iter().take(usize::from(count)) {
            writer.write_bytes(arg);
        }
    }
}

impl Decode for RpcCall {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let method_id = reader.read_u16()?;
        let arg_count = reader.read_u16()?;
        let mut args = Vec::with_capacity(usize::from(arg_count).min(reader.remaining()));
        for _ in 0..arg_count {
            args.push(reader.read_bytes()?.to_vec());
        }
        Ok(Self { method_id, args })
    }
}

impl Encode for ServiceError {
    fn encode(&self, writer: &mut WireWriter) {
        match self {
            ServiceError::NotFound(message) => {
                writer.write_u8(0);
                writer.write_str(message);
            }
            ServiceError::UnknownMethod(id) => {
                writer.write_u8(1);
                writer.write_u16(*id);
            }
            ServiceError::InvalidArguments(message) => {
                writer.write_u8(2);
                writer.write_str(message);
            }
            ServiceError::Failed(message) => {
                writer.write_u8(3);
                writer.write_str(message);
            }
        }
    }
}

impl Decode for ServiceError {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            0 => Ok(ServiceError::NotFound(reader.read_string()?)),
            1 => Ok(ServiceError::UnknownMethod(reader.read_u16()?)),
            2 => Ok(ServiceError::InvalidArguments(reader.read_string()?)),
            3 => Ok(ServiceError::Failed(reader.read_string()?)),
            tag => Err(DecodeError::UnknownTag {
                kind: "service error",
                tag,
            }),
        }
    }
}

impl Encode for RpcResult {
    fn encode(&self, writer: &mut WireWriter) {
        match self {
            RpcResult::Ok(value) => {
                writer.write_bool(true);
                writer.write_bytes(value);
            }
            RpcResult::Err(err) => {
                writer.write_bool(false);
                err.encode(writer);
            }
        }
    }
}

impl Decode for RpcResult {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        if reader.read_bool()? {
            Ok(RpcResult::Ok(reader.read_bytes()?.to_vec()))
        } else {
            Ok(RpcResult::Err(ServiceError::decode(reader)?))
        }
    }
}
