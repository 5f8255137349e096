//! A memoization layer in front of an expensive, pure computation.
//!
//! The computation depends on a context object that is fetched from an external store by its
//! hash. [`MemoService`] resolves contexts through a time-bounded cache and memoizes the
//! outputs of the computation per context, so that repeated calls neither fetch nor compute
//! again.

#[macro_use]
pub mod metrics;

pub mod config;
pub mod error;
pub mod logging;
pub mod resolver;
pub mod service;

pub use config::Config;
pub use error::FetchError;
pub use resolver::{ContextFetcher, ContextResolver, ContextResult};
pub use service::{Computation, MemoService};

/// Initializes sentry, logging and metrics from `config`.
///
/// Hold on to the returned sentry guard for the lifetime of the process, dropping it flushes
/// pending events.
///
/// # Errors
///
/// Fails if the statsd host cannot be resolved, or if metrics were configured before.
pub fn init(config: &Config) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let sentry = logging::init_sentry(config);
    logging::init_logging(config);
    metrics::configure(config)?;
    Ok(sentry)
}
