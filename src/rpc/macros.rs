/// Declares an RPC service contract.
///
/// Expands to the service trait, a client stub whose methods marshal their
/// arguments into an [`RpcCall`](crate::rpc::RpcCall), and a generic server
/// dispatcher implementing [`Dispatch`](crate::rpc::Dispatch) for any type
/// that implements the trait.
///
/// ```ignore
/// rpc_service! {
///     pub trait Greeter {
///         client = GreeterClient;
///         server = GreeterServer;
///
///         fn greet(name: String) -> String = 0;
///     }
/// }
/// ```
///
/// Method ids are part of the wire protocol and must stay stable.
#[macro_export]
macro_rules! rpc_service {
    (
        $(#[$meta:meta])*
        $vis:vis trait $service:ident {
            client = $client:ident;
            server = $server:ident;

            $(
                $(#[$mmeta:meta])*
                fn $method:ident($($arg:ident: $arg_ty:ty),* $(,)?) -> $ret:ty = $id:literal;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $service: ::std::marker::Send + ::std::marker::Sync + 'static {
            $(
                $(#[$mmeta])*
                fn $method(&self $(, $arg: $arg_ty)*)
                    -> ::std::result::Result<$ret, $crate::rpc::ServiceError>;
            )*
        }

        #[doc = concat!("Client stub for [`", stringify!($service), "`].")]
        $vis struct $client {
            rpc: $crate::rpc::RpcClient,
        }

        impl $client {
            /// `(name, id)` of every method in the contract.
            pub const METHODS: &'static [(&'static str, u16)] =
                &[$((stringify!($method), $id)),*];

            pub fn new(rpc: $crate::rpc::RpcClient) -> Self {
                Self { rpc }
            }

            pub fn connect(
                addr: ::std::net::SocketAddr,
                config: $crate::transport::ChannelConfig,
            ) -> ::std::result::Result<Self, $crate::transport::TransportError> {
                ::std::result::Result::Ok(Self::new($crate::rpc::RpcClient::connect(addr, config)?))
            }

            /// A stub with no channel; every call fails with `Unavailable`.
            pub fn disconnected() -> Self {
                Self::new($crate::rpc::RpcClient::disconnected())
            }

            pub fn is_connected(&self) -> bool {
                self.rpc.is_connected()
            }

            pub fn disconnect(&self) {
                self.rpc.disconnect()
            }

            $(
                $(#[$mmeta])*
                pub fn $method(&self $(, $arg: $arg_ty)*)
                    -> ::std::result::Result<$ret, $crate::rpc::RpcError>
                {
                    let call = $crate::rpc::RpcCall::new(
                        $id,
                        ::std::vec![$($crate::codec::to_bytes(&$arg)),*],
                    )?;
                    let value = self.rpc.call(&call)?;
                    ::std::result::Result::Ok($crate::codec::from_bytes::<$ret>(&value)?)
                }
            )*
        }

        #[doc = concat!("Dispatches calls to any [`", stringify!($service), "`] implementation.")]
        $vis struct $server<T> {
            service: ::std::sync::Arc<T>,
        }

        impl<T: $service> $server<T> {
            pub fn new(service: T) -> Self {
                Self::from_arc(::std::sync::Arc::new(service))
            }

            pub fn from_arc(service: ::std::sync::Arc<T>) -> Self {
                Self { service }
            }

            pub fn service(&self) -> &T {
                &self.service
            }
        }

        impl<T: $service> $crate::rpc::Dispatch for $server<T> {
            fn dispatch(&self, call: &$crate::rpc::RpcCall) -> $crate::rpc::RpcResult {
                match call.method_id {
                    $(
                        $id => {
                            #[allow(unused_mut)]
                            let mut args = call.args();
                            $(
                                let $arg: $arg_ty = match args.next_arg() {
                                    ::std::result::Result::Ok(value) => value,
                                    ::std::result::Result::Err(err) => {
                                        return $crate::rpc::RpcResult::Err(err)
                                    }
                                };
                            )*
                            if let ::std::result::Result::Err(err) = args.finish() {
                                return $crate::rpc::RpcResult::Err(err);
                            }
                            match self.service.$method($($arg),*) {
                                ::std::result::Result::Ok(value) => {
                                    $crate::rpc::RpcResult::Ok($crate::codec::to_bytes(&value))
                                }
                                ::std::result::Result::Err(err) => $crate::rpc::RpcResult::Err(err),
                            }
                        }
                    )*
                    other => $crate::rpc::RpcResult::Err($crate::rpc::ServiceError::UnknownMethod(other)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::codec::to_bytes;
    use crate::rpc::{Dispatch, RpcCall, RpcResult, ServiceError};

    crate::rpc_service! {
        /// Test contract.
        pub trait Calculator {
            client = CalculatorClient;
            server = CalculatorServer;

            fn add(a: i32, b: i32) -> i32 = 0;
            fn divide(a: i32, b: i32) -> i32 = 1;
            fn reset() -> () = 7;
        }
    }

    struct Plain;

    impl Calculator for Plain {
        fn add(&self, a: i32, b: i32) -> Result<i32, ServiceError> {
            Ok(a + b)
        }

        fn divide(&self, a: i32, b: i32) -> Result<i32, ServiceError> {
            a.checked_div(b)
                .ok_or_else(|| ServiceError::Failed("division by zero".to_string()))
        }

        fn reset(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    #[test]
    fn server_resolves_method_by_id() {
        let server = CalculatorServer::new(Plain);
        let call = RpcCall::new(0, vec![to_bytes(&2i32), to_bytes(&40i32)]).expect("call");
        assert_eq!(server.dispatch(&call), RpcResult::Ok(to_bytes(&42i32)));

        let reset = RpcCall::new(7, Vec::new()).expect("call");
        assert_eq!(server.dispatch(&reset), RpcResult::Ok(Vec::new()));
    }

    #[test]
    fn service_errors_are_returned_not_raised() {
        let server = CalculatorServer::new(Plain);
        let call = RpcCall::new(1, vec![to_bytes(&1i32), to_bytes(&0i32)]).expect("call");
        assert_eq!(
            server.dispatch(&call),
            RpcResult::Err(ServiceError::Failed("division by zero".to_string()))
        );
    }

    #[test]
    fn unknown_method_and_bad_arguments() {
        let server = CalculatorServer::new(Plain);
        assert_eq!(
            server.dispatch(&RpcCall::new(3, Vec::new()).expect("call")),
            RpcResult::Err(ServiceError::UnknownMethod(3))
        );
        assert!(matches!(
            server.dispatch(&RpcCall::new(0, vec![to_bytes(&1i32)]).expect("call")),
            RpcResult::Err(ServiceError::InvalidArguments(_))
        ));
        assert!(matches!(
            server.dispatch(&RpcCall::new(7, vec![to_bytes(&1i32)]).expect("call")),
            RpcResult::Err(ServiceError::InvalidArguments(_))
        ));
    }

    #[test]
    fn method_table_lists_ids() {
        assert_eq!(
            CalculatorClient::METHODS,
            &[("add", 0u16), ("divide", 1), ("reset", 7)]
        );
    }

    #[test]
    fn disconnected_stub_fails_without_a_peer() {
        let client = CalculatorClient::disconnected();
        assert!(!client.is_connected());
        assert!(matches!(
            client.add(1, 2),
            Err(crate::rpc::RpcError::Unavailable)
        ));
    }
}
