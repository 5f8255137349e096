use std::sync::Arc;
use std::time::Duration;

use memoizer_service::FetchError;
use memoizer_test::MockStore;

use crate::utils::{service, store};

#[tokio::test(start_paused = true)]
async fn test_resolve_fetches_once() {
    let store = store();
    let (service, _) = service(&store);

    let c1 = service.resolver().resolve("h1").await.unwrap();
    assert_eq!(c1.payload, "first");
    assert_eq!(store.calls(), 1);

    let again = service.resolver().resolve("h1").await.unwrap();
    assert!(Arc::ptr_eq(&c1, &again));
    assert_eq!(store.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_refetch_within_ttl() {
    let store = store();
    let (service, _) = service(&store);

    service.resolver().resolve("h1").await.unwrap();
    tokio::time::advance(Duration::from_millis(90)).await;
    service.sweep();
    service.resolver().resolve("h1").await.unwrap();

    assert_eq!(store.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resolves_coalesce() {
    let store = MockStore::with_latency(Duration::from_millis(20));
    store.insert("h1", "first");
    let store = Arc::new(store);
    let (service, _) = service(&store);

    let resolver = service.resolver();
    let (a, b) = futures::join!(resolver.resolve("h1"), resolver.resolve("h1"));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(store.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_times_out() {
    let store = MockStore::with_latency(Duration::from_secs(1));
    store.insert("h1", "first");
    let store = Arc::new(store);
    let (service, _) = service(&store);

    let err = service.resolver().resolve("h1").await.unwrap_err();
    assert_eq!(err, FetchError::Timeout(Duration::from_millis(50)));
    assert!(service.resolver().cache().is_empty());
}
