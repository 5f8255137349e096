use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};

/// A future that resolves to the result of a coalesced request.
///
/// Every caller that asked for the same key while the request was running gets a clone of the
/// same future, and all of them resolve to a clone of the same output.
pub type Coalesced<T> = Shared<BoxFuture<'static, T>>;

/// The running requests by key.
///
/// The registry only holds weak references, the callers own the requests. Each request is tagged
/// with an id, so that a request that went away never unregisters its successor.
struct Registry<K, T> {
    next_id: u64,
    requests: HashMap<K, (u64, WeakShared<BoxFuture<'static, T>>)>,
}

impl<K, T> Default for Registry<K, T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            requests: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T> Registry<K, T> {
    fn join(&self, key: &K) -> Option<Coalesced<T>> {
        self.requests.get(key).and_then(|(_, weak)| weak.upgrade())
    }
}

type InFlight<K, T> = Arc<Mutex<Registry<K, T>>>;

/// Runs a closure when dropped.
struct CallOnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> CallOnDrop<F> {
    fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for CallOnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// A registry of in-flight requests that deduplicates concurrent requests for the same key.
///
/// The first caller for a key starts the request, every caller arriving while it is still
/// running joins it instead of starting another one. As soon as the request finishes, its key is
/// removed from the registry: the [`Coalescer`] does not cache results, pair it with a cache for
/// that.
///
/// Dropping a [`Coalesced`] future only cancels the wait of that caller. The request keeps its
/// progress and is driven to completion by whoever polls it next. Once every caller dropped its
/// future, the request is abandoned and its key leaves the registry.
pub struct Coalescer<K, T> {
    inflight: InFlight<K, T>,
}

impl<K, T> fmt::Debug for Coalescer<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inflight = self
            .inflight
            .try_lock()
            .map(|r| r.requests.len())
            .unwrap_or_default();
        f.debug_struct("Coalescer")
            .field("in-flight requests", &inflight)
            .finish()
    }
}

impl<K, T> Clone for Coalescer<K, T> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, T> Default for Coalescer<K, T> {
    fn default() -> Self {
        Self {
            inflight: Default::default(),
        }
    }
}

impl<K, T> Coalescer<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the request for `key`, or joins the one that is already running.
    ///
    /// `make` is only invoked when no request for `key` is in flight. The registration happens
    /// right away, not when the returned future is first polled.
    pub fn run<F, Fut>(&self, key: K, make: F) -> Coalesced<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = {
            let mut registry = self.inflight.lock().unwrap();
            if let Some(running) = registry.join(&key) {
                tracing::trace!("Joining in-flight request");
                return running;
            }
            registry.next_id += 1;
            registry.next_id
        };

        let request = make();
        // Unregisters the request once it finished or was dropped by its last caller.
        let done_token = CallOnDrop::new({
            let inflight = Arc::clone(&self.inflight);
            let key = key.clone();
            move || {
                let mut registry = inflight.lock().unwrap();
                if registry.requests.get(&key).is_some_and(|(r, _)| *r == id) {
                    registry.requests.remove(&key);
                }
            }
        });
        let future = async move {
            let _done_token = done_token;
            request.await
        }
        .boxed()
        .shared();

        let mut registry = self.inflight.lock().unwrap();
        // `make` ran without holding the lock, so somebody else may have started the same
        // request in the meantime. Theirs wins and ours is dropped before it was ever polled.
        if let Some(running) = registry.join(&key) {
            drop(registry);
            return running;
        }
        if let Some(weak) = future.downgrade() {
            registry.requests.insert(key, (id, weak));
        }
        drop(registry);

        future
    }

    /// Whether a request for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().unwrap().requests.contains_key(key)
    }

    /// The number of requests currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap().requests.len()
    }
}
