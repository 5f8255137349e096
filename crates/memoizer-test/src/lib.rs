//! Helpers for testing the memo service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Hand the service an `Arc` of the [`MockStore`] and a clone of the
//!    [`CountingComputation`], and keep the originals around to inspect how often the store was
//!    asked and the computation was invoked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use memoizer_service::{Computation, Config, ContextFetcher, FetchError};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memoizer` crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoizer=trace,memoizer_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A config with short durations, suited for tests running with paused time.
///
///  - contexts live for 100ms
///  - fetches time out after 50ms
///  - sweeps run every 10ms
pub fn config() -> Config {
    Config {
        context_ttl: Duration::from_millis(100),
        fetch_timeout: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// The context objects handed out by the [`MockStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Background {
    /// The hash this background is stored under.
    pub hash: String,
    /// Some payload the computation depends on.
    pub payload: String,
}

/// The input of the [`CountingComputation`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Input {
    pub value: i64,
    pub tag: char,
}

impl Input {
    pub fn new(value: i64, tag: char) -> Self {
        Self { value, tag }
    }
}

/// The state of the [`CountingComputation`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct State {
    pub total: i64,
    pub steps: u32,
}

impl State {
    pub fn new(total: i64, steps: u32) -> Self {
        Self { total, steps }
    }
}

/// An in-memory backing store that counts how often it was asked for a context.
#[derive(Debug, Default)]
pub struct MockStore {
    contexts: Mutex<HashMap<String, Result<Background, FetchError>>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl MockStore {
    /// Creates an empty store answering right away.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that takes `latency` to answer each fetch.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Stores a background with the given `payload` under `hash`.
    pub fn insert(&self, hash: &str, payload: &str) -> &Self {
        let background = Background {
            hash: hash.to_owned(),
            payload: payload.to_owned(),
        };
        self.contexts
            .lock()
            .unwrap()
            .insert(hash.to_owned(), Ok(background));
        self
    }

    /// Makes every fetch of `hash` fail with `error`.
    pub fn fail(&self, hash: &str, error: FetchError) -> &Self {
        self.contexts
            .lock()
            .unwrap()
            .insert(hash.to_owned(), Err(error));
        self
    }

    /// How often the store was asked for a context.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ContextFetcher for MockStore {
    type Context = Background;

    fn fetch_context<'a>(
        &'a self,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<Self::Context, FetchError>> {
        async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.contexts
                .lock()
                .unwrap()
                .get(hash)
                .cloned()
                .unwrap_or(Err(FetchError::NotFound))
        }
        .boxed()
    }
}

/// A deterministic computation that counts its invocations.
///
/// Clones share the counter.
#[derive(Clone, Debug, Default)]
pub struct CountingComputation {
    calls: Arc<AtomicUsize>,
}

impl CountingComputation {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often the computation was invoked, across all clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Computation<State, Input, Background> for CountingComputation {
    fn compute(&self, state: &State, input: &Input, background: &Background) -> State {
        self.calls.fetch_add(1, Ordering::Relaxed);
        State {
            total: state.total + input.value * background.payload.len() as i64,
            steps: state.steps + 1,
        }
    }
}
