//! Cookie access on the engine's cookie store, exposed to the host over RPC.

mod service;
mod store;

pub use service::CookieService;
pub use store::{CookieStore, CookieVisitor, DeleteCallback, InMemoryCookieStore, SetCallback};

use serde::{Deserialize, Serialize};

use crate::codec::{Decode, DecodeError, Encode, WireReader, WireWriter};
use crate::rpc::ServiceError;

/// A cookie as mirrored between the host and the engine store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Empty for a host-only cookie.
    pub domain: String,
    /// Empty means `/`.
    pub path: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: String::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn is_host_only(&self) -> bool {
        self.domain.is_empty()
    }
}

impl Encode for Cookie {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_str(&self.name);
        writer.write_str(&self.value);
        writer.write_str(&self.domain);
        writer.write_str(&self.path);
    }
}

impl Decode for Cookie {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            value: reader.read_string()?,
            domain: reader.read_string()?,
            path: reader.read_string()?,
        })
    }
}

crate::rpc_service! {
    /// Cookie operations the host can run against the engine's store.
    pub trait CookieControls {
        client = CookieControlsClient;
        server = CookieControlsServer;

        /// First cookie named `key` visible for `url`.
        fn get(url: String, key: String) -> Cookie = 0;

        /// Stores `cookie` for `url`; false when the store refused it.
        fn set(url: String, cookie: Cookie) -> bool = 1;

        /// Deletes cookies named `key` visible for `url`, or all of them
        /// when `key` is empty.
        fn delete(url: String, key: String) -> () = 2;
    }
}

impl From<url::ParseError> for ServiceError {
    fn from(err: url::ParseError) -> Self {
        ServiceError::InvalidArguments(format!("invalid url: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes, to_bytes};

    #[test]
    fn cookie_fields_are_encoded_in_fixed_order() {
        let cookie = Cookie::new("n", "v").with_domain("d").with_path("/p");
        assert_eq!(
            to_bytes(&cookie),
            vec![
                1, 0, 0, 0, b'n', 1, 0, 0, 0, b'v', 1, 0, 0, 0, b'd', 2, 0, 0, 0, b'/', b'p'
            ]
        );
        assert_eq!(from_bytes::<Cookie>(&to_bytes(&cookie)), Ok(cookie));
    }

    #[test]
    fn host_only_means_no_domain() {
        assert!(Cookie::new("a", "b").is_host_only());
        assert!(!Cookie::new("a", "b").with_domain("example.com").is_host_only());
    }

    #[test]
    fn contract_method_ids_are_stable() {
        assert_eq!(
            CookieControlsClient::METHODS,
            &[("get", 0u16), ("set", 1), ("delete", 2)]
        );
    }

    #[test]
    fn cookie_serializes_as_json() {
        let cookie = Cookie::new("sid", "42").with_path("/");
        let json = serde_json::to_string(&cookie).expect("serialize");
        assert_eq!(
            json,
            r#"{"name":"sid","value":"42","domain":"","path":"/"}"#
        );
        let back: Cookie = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cookie);
    }
}
