//! Caching primitives for memoizing expensive, pure computations.
//!
//! These primitives can be composed and layered on top of each other:
//!
//! - [`TtlCache`] keeps externally fetched objects for a fixed time-to-live and evicts them
//!   lazily through an explicit [`sweep`](TtlCache::sweep).
//! - [`MemoTable`] remembers the outputs of a computation per context key.
//! - [`Coalescer`] deduplicates concurrent requests for the same key, so that only one of them
//!   does the actual work while the others wait for its result.

#![warn(missing_docs)]

mod coalesce;
mod memo;
mod ttl;

pub use coalesce::*;
pub use memo::*;
pub use ttl::*;

#[cfg(any(test, feature = "test"))]
pub(crate) use tokio::time;

#[cfg(not(any(test, feature = "test")))]
pub(crate) use std::time;
