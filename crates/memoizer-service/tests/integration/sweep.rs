use std::sync::Arc;
use std::time::Duration;

use memoizer_service::Config;
use memoizer_test::{Input, State};

use crate::utils::{service, service_with_config, store};

#[tokio::test(start_paused = true)]
async fn test_sweep_evicts_context_and_records() {
    let store = store();
    let (service, computation) = service(&store);

    let input = Input::new(1, 'a');
    service
        .compute(State::default(), input.clone(), "h1")
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(service.sweep(), 0);
    assert_eq!(service.memo().record_count(), 1);

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(service.sweep(), 1);
    assert!(service.resolver().cache().get("h1").is_none());
    assert!(service.memo().records("h1").is_empty());

    // both the context and the output have to be produced again
    service
        .compute(State::default(), input, "h1")
        .await
        .unwrap();
    assert_eq!(store.calls(), 2);
    assert_eq!(computation.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_young_contexts() {
    let store = store();
    let (service, _) = service(&store);

    service.resolver().resolve("h1").await.unwrap();
    tokio::time::advance(Duration::from_millis(60)).await;
    service
        .compute(State::default(), Input::new(1, 'a'), "h2")
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(60)).await;

    assert_eq!(service.sweep(), 1);
    assert!(service.resolver().cache().get("h1").is_none());
    assert!(service.resolver().cache().get("h2").is_some());
    assert_eq!(service.memo().records("h2").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_task() {
    let store = store();
    let (service, _) = service(&store);
    let service = Arc::new(service);

    service.resolver().resolve("h1").await.unwrap();
    let sweeper = service.spawn_sweeper().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.resolver().cache().get("h1").is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service.resolver().cache().get("h1").is_none());

    drop(service);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sweeper.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_zero_sweep_interval_spawns_no_sweeper() {
    let store = store();
    let config = Config {
        sweep_interval: Duration::ZERO,
        ..memoizer_test::config()
    };
    let (service, _) = service_with_config(&config, &store);
    let service = Arc::new(service);

    service.resolver().resolve("h1").await.unwrap();
    assert!(service.spawn_sweeper().is_none());

    tokio::time::advance(Duration::from_millis(150)).await;
    assert!(service.resolver().cache().get("h1").is_some());
    assert_eq!(service.sweep(), 1);
}
