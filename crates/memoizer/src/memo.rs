use std::borrow::Borrow;
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use moka::sync::Cache;

/// The default bound on the number of contexts a [`MemoTable`] holds records for.
pub const DEFAULT_MAX_CONTEXTS: u64 = 10_000;

/// The default bound on the number of records a [`MemoTable`] holds per context.
pub const DEFAULT_MAX_RECORDS_PER_CONTEXT: usize = 1_024;

/// A single memoized evaluation: `output_state = f(input_state, input, context)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoRecord<I, S> {
    /// The input the computation was invoked with.
    pub input: I,
    /// The state the computation was invoked with.
    pub input_state: S,
    /// The state the computation produced.
    pub output_state: S,
}

/// All records memoized for one context.
#[derive(Debug)]
struct MemoBucket<C, I, S> {
    context: Arc<C>,
    records: VecDeque<MemoRecord<I, S>>,
}

type SharedBucket<C, I, S> = Arc<Mutex<MemoBucket<C, I, S>>>;

/// Memoized outputs of a computation, grouped by the context they were computed in.
///
/// Buckets are keyed by a stable surrogate key of the context (such as the hash it was fetched
/// with) rather than by the identity of the context object, so that a re-fetched context keeps
/// using the records of the previous one.
///
/// Within a bucket, records form an ordered multimap: several records may share the same
/// `input` as long as they differ in `input_state`. The table never deduplicates. It relies on
/// the memoized computation being deterministic, in which case two records with the same
/// `(input, input_state)` always agree on the output.
///
/// The table is bounded in two ways: a bucket holds at most `max_records_per_context` records
/// and drops its oldest one when full, and at most `max_contexts` buckets are kept, with
/// [`moka`] evicting the least useful ones.
pub struct MemoTable<K, C, I, S> {
    buckets: Cache<K, SharedBucket<C, I, S>>,
    max_records_per_context: usize,
}

impl<K, C, I, S> fmt::Debug for MemoTable<K, C, I, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    C: Send + Sync + 'static,
    I: Send + 'static,
    S: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoTable")
            .field("contexts", &self.buckets.entry_count())
            .field("max_records_per_context", &self.max_records_per_context)
            .finish()
    }
}

impl<K, C, I, S> Default for MemoTable<K, C, I, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    C: Send + Sync + 'static,
    I: Eq + Clone + Send + 'static,
    S: Eq + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXTS, DEFAULT_MAX_RECORDS_PER_CONTEXT)
    }
}

impl<K, C, I, S> MemoTable<K, C, I, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    C: Send + Sync + 'static,
    I: Eq + Clone + Send + 'static,
    S: Eq + Clone + Send + 'static,
{
    /// Creates an empty table.
    pub fn new(max_contexts: u64, max_records_per_context: usize) -> Self {
        let buckets = Cache::builder().max_capacity(max_contexts).build();
        Self {
            buckets,
            max_records_per_context,
        }
    }

    /// Looks up the output memoized for `(input, input_state)` in the context `key`.
    ///
    /// Both `input` and `input_state` have to match a record. A record that only matches the
    /// `input` is not a hit.
    pub fn lookup<Q>(&self, key: &Q, input: &I, input_state: &S) -> Option<S>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let bucket = self.buckets.get(key)?;
        let bucket = bucket.lock().unwrap();
        bucket
            .records
            .iter()
            .find(|record| record.input == *input && record.input_state == *input_state)
            .map(|record| record.output_state.clone())
    }

    /// Appends a record to the bucket of `key`, creating the bucket if needed.
    ///
    /// The bucket remembers `context` as the context its records belong to.
    pub fn insert(&self, key: K, context: Arc<C>, input: I, input_state: S, output_state: S) {
        if self.max_records_per_context == 0 {
            return;
        }

        let bucket = self.buckets.get_with(key, || {
            Arc::new(Mutex::new(MemoBucket {
                context: Arc::clone(&context),
                records: VecDeque::new(),
            }))
        });
        let mut bucket = bucket.lock().unwrap();

        if !Arc::ptr_eq(&bucket.context, &context) {
            bucket.context = context;
        }

        if bucket.records.len() >= self.max_records_per_context {
            tracing::trace!("Memo bucket is full, dropping oldest record");
            bucket.records.pop_front();
        }
        bucket.records.push_back(MemoRecord {
            input,
            input_state,
            output_state,
        });
    }

    /// The context the records of `key` belong to.
    pub fn context<Q>(&self, key: &Q) -> Option<Arc<C>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let bucket = self.buckets.get(key)?;
        let bucket = bucket.lock().unwrap();
        Some(Arc::clone(&bucket.context))
    }

    /// All records of `key` in insertion order.
    pub fn records<Q>(&self, key: &Q) -> Vec<MemoRecord<I, S>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.buckets.get(key) {
            Some(bucket) => bucket.lock().unwrap().records.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Drops the bucket of `key` together with all of its records.
    ///
    /// Returns whether there was a bucket to drop.
    pub fn evict<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.buckets.remove(key).is_some()
    }

    /// Drops all buckets.
    pub fn clear(&self) {
        self.buckets.invalidate_all();
    }

    /// The number of contexts that have records.
    pub fn len(&self) -> usize {
        self.buckets.iter().count()
    }

    /// Whether there are no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of records across all contexts.
    pub fn record_count(&self) -> usize {
        self.buckets
            .iter()
            .map(|(_, bucket)| bucket.lock().unwrap().records.len())
            .sum()
    }
}
