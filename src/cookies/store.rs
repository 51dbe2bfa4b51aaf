use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use url::Url;

use super::Cookie;

/// Receives cookies one at a time during an enumeration. The enumeration is
/// complete when the store drops the visitor.
pub type CookieVisitor = Box<dyn FnMut(Cookie) + Send>;

/// Completion for [`CookieStore::set_cookie`]: whether the cookie was stored.
pub type SetCallback = Box<dyn FnOnce(bool) + Send>;

/// Completion for [`CookieStore::delete_cookies`]: how many were removed.
pub type DeleteCallback = Box<dyn FnOnce(usize) + Send>;

/// Native cookie store of the engine.
///
/// Every operation completes asynchronously, possibly on another thread. A
/// store that gives up on a request drops its callback without calling it.
pub trait CookieStore: Send + Sync + 'static {
    /// Enumerates every cookie visible for `url`.
    fn visit_url_cookies(&self, url: &Url, visitor: CookieVisitor);

    fn set_cookie(&self, url: &Url, cookie: Cookie, done: SetCallback);

    /// Removes cookies visible for `url`, restricted to `name` when given.
    fn delete_cookies(&self, url: &Url, name: Option<String>, done: DeleteCallback);
}

impl<S: CookieStore + ?Sized> CookieStore for Arc<S> {
    fn visit_url_cookies(&self, url: &Url, visitor: CookieVisitor) {
        (**self).visit_url_cookies(url, visitor)
    }

    fn set_cookie(&self, url: &Url, cookie: Cookie, done: SetCallback) {
        (**self).set_cookie(url, cookie, done)
    }

    fn delete_cookies(&self, url: &Url, name: Option<String>, done: DeleteCallback) {
        (**self).delete_cookies(url, name, done)
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// In-process cookie store with browser-style domain and path matching.
///
/// Cookies enumerate in insertion order. Callbacks are delivered from the
/// store's own worker thread, never from the caller's.
pub struct InMemoryCookieStore {
    entries: Arc<Mutex<Vec<Entry>>>,
    jobs: Option<Sender<Job>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

#[derive(Debug, Clone)]
struct Entry {
    cookie: Cookie,
    /// Lowercased host (host-only) or domain without the leading dot.
    scope: String,
    host_only: bool,
    path: String,
}

impl Entry {
    fn new(url: &Url, cookie: Cookie) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        let domain = cookie.domain.trim_start_matches('.').to_ascii_lowercase();

        let (scope, host_only) = if domain.is_empty() {
            (host, true)
        } else if domain_matches(&host, &domain) {
            (domain, false)
        } else {
            return None;
        };

        let path = if cookie.path.starts_with('/') {
            cookie.path.clone()
        } else {
            "/".to_string()
        };

        Some(Self {
            cookie,
            scope,
            host_only,
            path,
        })
    }

    fn visible_for(&self, host: &str, path: &str) -> bool {
        let host_ok = if self.host_only {
            host == self.scope
        } else {
            domain_matches(host, &self.scope)
        };
        host_ok && path_matches(&self.path, path)
    }

    fn same_key(&self, other: &Entry) -> bool {
        self.cookie.name == other.cookie.name
            && self.scope == other.scope
            && self.host_only == other.host_only
            && self.path == other.path
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn request_scope(url: &Url) -> Option<(String, String)> {
    let host = url.host_str()?.to_ascii_lowercase();
    let path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    Some((host, path))
}

impl InMemoryCookieStore {
    pub fn new() -> Self {
        let (jobs, rx) = crossbeam_channel::unbounded::<Job>();

        let worker = std::thread::Builder::new()
            .name("uwb-cookie-store".to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
                tracing::debug!("Cookie store worker exiting");
            })
            .expect("Failed to spawn cookie store thread");

        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            jobs: Some(jobs),
            worker: Some(worker),
        }
    }

    /// Number of stored cookies across all hosts.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Every stored cookie, in insertion order.
    pub fn all_cookies(&self) -> Vec<Cookie> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.cookie.clone())
            .collect()
    }

    fn submit(&self, job: Job) {
        let Some(jobs) = self.jobs.as_ref() else {
            return;
        };
        if jobs.send(job).is_err() {
            tracing::warn!("Cookie store worker is gone; request dropped");
        }
    }
}

impl Default for InMemoryCookieStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryCookieStore {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl CookieStore for InMemoryCookieStore {
    fn visit_url_cookies(&self, url: &Url, mut visitor: CookieVisitor) {
        let entries = Arc::clone(&self.entries);
        let scope = request_scope(url);
        self.submit(Box::new(move || {
            let Some((host, path)) = scope else {
                return;
            };
            let visible: Vec<Cookie> = entries
                .lock()
                .iter()
                .filter(|entry| entry.visible_for(&host, &path))
                .map(|entry| entry.cookie.clone())
                .collect();
            for cookie in visible {
                visitor(cookie);
            }
        }));
    }

    fn set_cookie(&self, url: &Url, cookie: Cookie, done: SetCallback) {
        let entries = Arc::clone(&self.entries);
        let entry = Entry::new(url, cookie);
        self.submit(Box::new(move || {
            let Some(entry) = entry else {
                done(false);
                return;
            };
            let mut entries = entries.lock();
            match entries.iter_mut().find(|existing| existing.same_key(&entry)) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
            drop(entries);
            done(true);
        }));
    }

    fn delete_cookies(&self, url: &Url, name: Option<String>, done: DeleteCallback) {
        let entries = Arc::clone(&self.entries);
        let scope = request_scope(url);
        self.submit(Box::new(move || {
            let Some((host, path)) = scope else {
                done(0);
                return;
            };
            let mut entries = entries.lock();
            let before = entries.len();
            entries.retain(|entry| {
                let targeted = entry.visible_for(&host, &path)
                    && name.as_deref().map_or(true, |name| entry.cookie.name == name);
                !targeted
            });
            let removed = before - entries.len();
            drop(entries);
            done(removed);
        }));
    }
}
