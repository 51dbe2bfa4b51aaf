use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use url::Url;

use super::{Cookie, CookieControls, CookieStore};
use crate::rpc::ServiceError;

/// Synchronous [`CookieControls`] on top of an asynchronous [`CookieStore`].
///
/// Each call blocks the serving thread until the store completes, bounded by
/// `timeout`.
pub struct CookieService<S> {
    store: S,
    timeout: Duration,
}

impl<S: CookieStore> CookieService<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every cookie visible for `url`, in the store's enumeration order.
    pub fn cookies(&self, url: &Url) -> Result<Vec<Cookie>, ServiceError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.store.visit_url_cookies(
            url,
            Box::new(move |cookie| {
                let _ = tx.send(cookie);
            }),
        );

        let deadline = Instant::now() + self.timeout;
        let mut cookies = Vec::new();
        loop {
            match rx.recv_deadline(deadline) {
                Ok(cookie) => cookies.push(cookie),
                // Visitor dropped: enumeration finished.
                Err(RecvTimeoutError::Disconnected) => return Ok(cookies),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(self.timed_out("enumerating cookies", url));
                }
            }
        }
    }

    fn wait<T>(
        &self,
        rx: crossbeam_channel::Receiver<T>,
        what: &str,
        url: &Url,
    ) -> Result<T, ServiceError> {
        match rx.recv_timeout(self.timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out(what, url)),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::Failed(format!(
                "cookie store abandoned {} for {}",
                what, url
            ))),
        }
    }

    fn timed_out(&self, what: &str, url: &Url) -> ServiceError {
        tracing::warn!("Cookie store timed out {} for {}", what, url);
        ServiceError::Failed(format!(
            "cookie store did not finish {} within {:?}",
            what, self.timeout
        ))
    }
}

impl<S: CookieStore> CookieControls for CookieService<S> {
    fn get(&self, url: String, key: String) -> Result<Cookie, ServiceError> {
        let parsed = Url::parse(&url)?;
        // Duplicates are possible; the first one enumerated wins.
        self.cookies(&parsed)?
            .into_iter()
            .find(|cookie| cookie.name == key)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no cookie named '{}' for {}", key, url))
            })
    }

    fn set(&self, url: String, cookie: Cookie) -> Result<bool, ServiceError> {
        let parsed = Url::parse(&url)?;
        let name = cookie.name.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.store.set_cookie(
            &parsed,
            cookie,
            Box::new(move |ok| {
                let _ = tx.send(ok);
            }),
        );
        let stored = self.wait(rx, "setting a cookie", &parsed)?;
        if !stored {
            tracing::debug!(url = %parsed, cookie = %name, "Cookie store refused cookie");
        }
        Ok(stored)
    }

    fn delete(&self, url: String, key: String) -> Result<(), ServiceError> {
        let parsed = Url::parse(&url)?;
        let name = (!key.is_empty()).then_some(key);
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.store.delete_cookies(
            &parsed,
            name,
            Box::new(move |removed| {
                let _ = tx.send(removed);
            }),
        );
        let removed = self.wait(rx, "deleting cookies", &parsed)?;
        tracing::debug!(url = %parsed, removed, "Deleted cookies");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::{CookieVisitor, DeleteCallback, InMemoryCookieStore, SetCallback};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn service() -> CookieService<InMemoryCookieStore> {
        CookieService::new(InMemoryCookieStore::new(), Duration::from_secs(2))
    }

    #[test]
    fn set_then_get_returns_the_same_cookie() {
        let service = service();
        let cookie = Cookie::new("sid", "abc").with_path("/app");
        assert!(service
            .set("https://example.com/app".to_string(), cookie.clone())
            .expect("set"));
        let got = service
            .get("https://example.com/app/page".to_string(), "sid".to_string())
            .expect("get");
        assert_eq!(got, cookie);
    }

    #[test]
    fn unknown_key_is_not_found() {
        let service = service();
        let err = service
            .get("https://example.com/".to_string(), "missing".to_string())
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn invalid_url_is_invalid_arguments() {
        let service = service();
        let err = service
            .get("not a url".to_string(), "k".to_string())
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArguments(_)));
    }

    #[test]
    fn empty_key_deletes_every_visible_cookie() {
        let service = service();
        let url = "https://example.com/".to_string();
        service.set(url.clone(), Cookie::new("a", "1")).expect("set");
        service.set(url.clone(), Cookie::new("b", "2")).expect("set");

        service.delete(url.clone(), "a".to_string()).expect("delete");
        assert!(service.get(url.clone(), "a".to_string()).is_err());
        assert!(service.get(url.clone(), "b".to_string()).is_ok());

        service.delete(url.clone(), String::new()).expect("delete all");
        assert!(service.cookies(&Url::parse(&url).expect("url")).expect("list").is_empty());
    }

    /// Store that never completes anything but keeps the callbacks alive.
    #[derive(Default)]
    struct Stalled {
        held: Mutex<Vec<Box<dyn std::any::Any + Send>>>,
    }

    impl CookieStore for Stalled {
        fn visit_url_cookies(&self, _url: &Url, visitor: CookieVisitor) {
            self.held.lock().push(Box::new(visitor));
        }

        fn set_cookie(&self, _url: &Url, _cookie: Cookie, done: SetCallback) {
            self.held.lock().push(Box::new(done));
        }

        fn delete_cookies(&self, _url: &Url, _name: Option<String>, done: DeleteCallback) {
            self.held.lock().push(Box::new(done));
        }
    }

    #[test]
    fn stalled_store_times_out_instead_of_hanging() {
        let service = CookieService::new(Stalled::default(), Duration::from_millis(100));
        let err = service
            .get("https://example.com/".to_string(), "a".to_string())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Failed(_)));
        assert!(service
            .set("https://example.com/".to_string(), Cookie::new("a", "1"))
            .is_err());
    }

    /// Store that drops every callback unanswered.
    struct Forgetful;

    impl CookieStore for Forgetful {
        fn visit_url_cookies(&self, _url: &Url, _visitor: CookieVisitor) {}
        fn set_cookie(&self, _url: &Url, _cookie: Cookie, _done: SetCallback) {}
        fn delete_cookies(&self, _url: &Url, _name: Option<String>, _done: DeleteCallback) {}
    }

    #[test]
    fn dropped_callbacks_fail_fast() {
        let service = CookieService::new(Forgetful, Duration::from_secs(5));
        let started = Instant::now();
        assert!(service
            .delete("https://example.com/".to_string(), "a".to_string())
            .is_err());
        assert!(matches!(
            service.get("https://example.com/".to_string(), "a".to_string()),
            Err(ServiceError::NotFound(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn set_get_round_trip(
            name in "[a-zA-Z][a-zA-Z0-9_]{0,12}",
            value in "[ -~]{0,24}",
            path in prop_oneof![Just(String::new()), Just("/".to_string()), Just("/a".to_string())],
        ) {
            let service = service();
            let cookie = Cookie::new(name.clone(), value).with_path(path);
            prop_assert!(service.set("https://example.com/a/b".to_string(), cookie.clone()).expect("set"));
            let got = service.get("https://example.com/a/b".to_string(), name).expect("get");
            prop_assert_eq!(got, cookie);
        }
    }
}
