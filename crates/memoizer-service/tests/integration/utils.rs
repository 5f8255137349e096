use std::sync::Arc;

use memoizer_service::{Config, MemoService};
use memoizer_test::{CountingComputation, Input, MockStore, State};

pub type TestService = MemoService<Arc<MockStore>, CountingComputation, Input, State>;

/// Creates a service around `store` with the test config, returning the service together with
/// a handle to its computation.
pub fn service_with_config(
    config: &Config,
    store: &Arc<MockStore>,
) -> (TestService, CountingComputation) {
    memoizer_test::setup();
    let computation = CountingComputation::new();
    let service = MemoService::new(config, Arc::clone(store), computation.clone());
    (service, computation)
}

/// Like [`service_with_config`], using [`memoizer_test::config`].
pub fn service(store: &Arc<MockStore>) -> (TestService, CountingComputation) {
    service_with_config(&memoizer_test::config(), store)
}

/// A store knowing the backgrounds `h1` and `h2`.
pub fn store() -> Arc<MockStore> {
    let store = MockStore::new();
    store.insert("h1", "first").insert("h2", "second");
    Arc::new(store)
}
