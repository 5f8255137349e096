use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use memoizer::{Coalescer, MemoTable};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::FetchError;
use crate::resolver::{ContextFetcher, ContextResolver};

/// The expensive computation that is being memoized.
///
/// Implementations must be pure: the output depends only on the arguments, the same arguments
/// always yield the same output, and computing has no observable side effects. Computations are
/// total and never fail for well-formed arguments.
///
/// The computation runs inline on the task that drives [`MemoService::compute`] and blocks its
/// worker thread until it returns. Expensive computations should be driven from a dedicated
/// runtime, or from a thread where blocking is fine, so they do not stall other tasks.
///
/// Any `Fn(&S, &I, &C) -> S` closure is a computation.
pub trait Computation<S, I, C>: Send + Sync + 'static {
    /// Computes the next state from `state`, `input` and `context`.
    fn compute(&self, state: &S, input: &I, context: &C) -> S;
}

impl<S, I, C, Func> Computation<S, I, C> for Func
where
    Func: Fn(&S, &I, &C) -> S + Send + Sync + 'static,
{
    fn compute(&self, state: &S, input: &I, context: &C) -> S {
        self(state, input, context)
    }
}

type ComputationKey<I, S> = (String, I, S);

/// Memoizes a [`Computation`] that depends on a context fetched from a backing store.
///
/// This is the single entry point of the memoization layer. [`compute`](Self::compute) resolves
/// the context of a hash, and answers from the memo table if the same `(hash, input, state)`
/// was computed before. Only on a miss is the computation invoked, and its output memoized.
///
/// The service owns all of its caches. Contexts expire after the configured TTL once
/// [`sweep`](Self::sweep) runs, either called by the owner or periodically through
/// [`spawn_sweeper`](Self::spawn_sweeper). Sweeping a context also drops everything that was
/// memoized for it.
pub struct MemoService<F, P, I, S>
where
    F: ContextFetcher,
{
    resolver: ContextResolver<F>,
    memo: Arc<MemoTable<String, F::Context, I, S>>,
    computation: Arc<P>,
    computations: Coalescer<ComputationKey<I, S>, S>,
    sweep_interval: Duration,
}

impl<F, P, I, S> fmt::Debug for MemoService<F, P, I, S>
where
    F: ContextFetcher,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoService")
            .field("resolver", &self.resolver)
            .field("memo", &self.memo)
            .field("computations", &self.computations)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl<F, P, I, S> MemoService<F, P, I, S>
where
    F: ContextFetcher,
    P: Computation<S, I, F::Context>,
    I: Eq + Hash + Clone + Send + Sync + 'static,
    S: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a new service with empty caches.
    pub fn new(config: &Config, fetcher: F, computation: P) -> Self {
        let memo = MemoTable::new(
            config.memo.max_contexts,
            config.memo.max_records_per_context,
        );
        Self {
            resolver: ContextResolver::from_config(config, fetcher),
            memo: Arc::new(memo),
            computation: Arc::new(computation),
            computations: Coalescer::new(),
            sweep_interval: config.sweep_interval,
        }
    }

    /// The resolver serving the contexts.
    pub fn resolver(&self) -> &ContextResolver<F> {
        &self.resolver
    }

    /// The table of memoized outputs.
    pub fn memo(&self) -> &MemoTable<String, F::Context, I, S> {
        &self.memo
    }

    /// Computes the state following `state` for `input` in the context of `hash`.
    ///
    /// The computation is only invoked if its output for `(hash, input, state)` has not been
    /// memoized yet. Concurrent calls with the same arguments share a single invocation, which
    /// runs synchronously on whichever task polls it first.
    ///
    /// # Errors
    ///
    /// Fails if the context of `hash` cannot be resolved. Nothing is memoized in that case.
    pub async fn compute(&self, state: S, input: I, hash: &str) -> Result<S, FetchError> {
        let context = self.resolver.resolve(hash).await?;

        if let Some(output) = self.memo.lookup(hash, &input, &state) {
            metric!(counter("memo.hit") += 1);
            tracing::trace!(hash, "Memo hit");
            return Ok(output);
        }
        metric!(counter("memo.miss") += 1);

        let key = (hash.to_owned(), input.clone(), state.clone());
        let memo = Arc::clone(&self.memo);
        let computation = Arc::clone(&self.computation);
        let hash = hash.to_owned();

        let output = self
            .computations
            .run(key, move || async move {
                // An identical computation may have finished since the lookup above.
                if let Some(output) = memo.lookup(&hash, &input, &state) {
                    return output;
                }

                tracing::trace!(%hash, "Invoking computation");
                let start = Instant::now();
                let output = computation.compute(&state, &input, &context);
                metric!(timer("memo.compute.duration") = start.elapsed());
                metric!(counter("memo.compute") += 1);

                memo.insert(hash, context, input, state, output.clone());
                output
            })
            .await;

        Ok(output)
    }

    /// Like [`compute`](Self::compute), but replaces `state` with the computed state.
    ///
    /// `state` is left untouched if the context cannot be resolved.
    pub async fn compute_in_place(
        &self,
        state: &mut S,
        input: I,
        hash: &str,
    ) -> Result<(), FetchError> {
        *state = self.compute(state.clone(), input, hash).await?;
        Ok(())
    }

    /// Evicts all expired contexts together with their memoized outputs.
    ///
    /// Returns the number of evicted contexts.
    pub fn sweep(&self) -> usize {
        let evicted = self.resolver.sweep();
        for hash in &evicted {
            self.memo.evict(hash.as_str());
        }

        metric!(counter("sweep.evicted") += evicted.len() as i64);
        metric!(gauge("context.cache.entries") = self.resolver.cache().len() as u64);
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "Swept expired contexts");
        }
        evicted.len()
    }

    /// Spawns a task that calls [`sweep`](Self::sweep) every `sweep_interval`.
    ///
    /// The task holds no strong reference to the service and ends once the service is dropped.
    /// It can also be stopped through the returned handle. No task is spawned if the service was
    /// configured with a zero `sweep_interval`; the owner has to call `sweep` then.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.sweep_interval.is_zero() {
            tracing::warn!("Sweep interval is zero, not spawning sweeper");
            return None;
        }

        let service = Arc::downgrade(self);
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let sweeper = tokio::spawn(async move {
            loop {
                interval.tick().await;
                let Some(service) = service.upgrade() else {
                    tracing::debug!("Memo service dropped, stopping sweeper");
                    break;
                };
                service.sweep();
            }
        });
        Some(sweeper)
    }
}
