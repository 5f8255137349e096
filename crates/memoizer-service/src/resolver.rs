use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use memoizer::{Coalescer, TtlCache};

use crate::config::Config;
use crate::error::FetchError;

/// The backing store that contexts are fetched from.
///
/// This is the only I/O boundary of the service. Implementations must report a missing context
/// as [`FetchError::NotFound`] and anything transient as [`FetchError::Transport`], so that
/// callers can tell whether a retry makes sense.
pub trait ContextFetcher: Send + Sync + 'static {
    /// The context object this store hands out.
    type Context: Send + Sync + 'static;

    /// Fetches the context identified by `hash`.
    fn fetch_context<'a>(
        &'a self,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<Self::Context, FetchError>>;
}

impl<F: ContextFetcher> ContextFetcher for Arc<F> {
    type Context = F::Context;

    fn fetch_context<'a>(
        &'a self,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<Self::Context, FetchError>> {
        (**self).fetch_context(hash)
    }
}

/// The result of resolving a context.
pub type ContextResult<C> = Result<Arc<C>, FetchError>;

/// Resolves hashes to shared context objects.
///
/// Contexts are served from a [`TtlCache`] and only fetched from the [`ContextFetcher`] on a
/// miss. Concurrent resolves of the same missing hash share a single fetch.
pub struct ContextResolver<F: ContextFetcher> {
    fetcher: Arc<F>,
    cache: Arc<TtlCache<String, F::Context>>,
    fetches: Coalescer<String, ContextResult<F::Context>>,
    fetch_timeout: Duration,
}

impl<F: ContextFetcher> fmt::Debug for ContextResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextResolver")
            .field("cache", &self.cache)
            .field("fetches", &self.fetches)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl<F: ContextFetcher> ContextResolver<F> {
    /// Creates a resolver with an empty cache.
    pub fn new(fetcher: F, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            cache: Arc::new(TtlCache::new(ttl)),
            fetches: Coalescer::new(),
            fetch_timeout,
        }
    }

    /// Creates a resolver using the TTL and fetch deadline of `config`.
    pub fn from_config(config: &Config, fetcher: F) -> Self {
        Self::new(fetcher, config.context_ttl, config.fetch_timeout)
    }

    /// The cache holding the resolved contexts.
    pub fn cache(&self) -> &TtlCache<String, F::Context> {
        &self.cache
    }

    /// Resolves `hash` to its context, fetching it from the backing store on a cache miss.
    ///
    /// A successfully fetched context is cached, failures are not.
    ///
    /// # Errors
    ///
    /// Fails if the backing store does not know the hash, cannot be reached, or does not
    /// answer within the fetch deadline.
    pub async fn resolve(&self, hash: &str) -> ContextResult<F::Context> {
        if let Some(context) = self.cache.get(hash) {
            metric!(counter("context.cache.hit") += 1);
            tracing::trace!(hash, "Context cache hit");
            return Ok(context);
        }
        metric!(counter("context.cache.miss") += 1);

        let fetcher = Arc::clone(&self.fetcher);
        let cache = Arc::clone(&self.cache);
        let timeout = self.fetch_timeout;
        let owned_hash = hash.to_owned();
        self.fetches
            .run(hash.to_owned(), move || {
                fetch_and_insert(fetcher, cache, owned_hash, timeout)
            })
            .await
    }

    /// The number of fetches currently running.
    pub fn in_flight_fetches(&self) -> usize {
        self.fetches.in_flight()
    }

    /// Removes the cached context of `hash`, if any.
    pub fn invalidate(&self, hash: &str) -> bool {
        self.cache.remove(hash).is_some()
    }

    /// Evicts all contexts that outlived the TTL and returns their hashes.
    pub fn sweep(&self) -> Vec<String> {
        self.cache.sweep()
    }
}

async fn fetch_and_insert<F: ContextFetcher>(
    fetcher: Arc<F>,
    cache: Arc<TtlCache<String, F::Context>>,
    hash: String,
    timeout: Duration,
) -> ContextResult<F::Context> {
    // A fetch that finished between the cache lookup and joining the in-flight fetches has
    // already populated the cache.
    if let Some(context) = cache.get(&hash) {
        return Ok(context);
    }

    tracing::debug!(%hash, "Fetching context");
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, fetcher.fetch_context(&hash)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };
    metric!(timer("context.fetch.duration") = start.elapsed());

    match result {
        Ok(context) => {
            metric!(counter("context.fetch") += 1, "result" => "ok");
            let context = Arc::new(context);
            cache.put(hash, Arc::clone(&context));
            Ok(context)
        }
        Err(err) => {
            metric!(counter("context.fetch") += 1, "result" => err.metrics_tag());
            tracing::warn!(
                %hash,
                error = &err as &dyn std::error::Error,
                "Failed to fetch context"
            );
            Err(err)
        }
    }
}
