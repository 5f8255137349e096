use std::sync::Arc;

use memoizer::MemoRecord;
use memoizer_service::{FetchError, MemoService};
use memoizer_test::{Background, Input, MockStore, State};

use crate::utils::{service, store};

#[tokio::test(start_paused = true)]
async fn test_second_call_is_memoized() {
    let store = store();
    let (service, computation) = service(&store);

    let s0 = State::default();
    let i1 = Input::new(3, 'a');

    let s1 = service.compute(s0.clone(), i1.clone(), "h1").await.unwrap();
    assert_eq!(s1, State::new(15, 1));
    assert_eq!(computation.calls(), 1);
    assert_eq!(
        service.memo().records("h1"),
        vec![MemoRecord {
            input: i1.clone(),
            input_state: s0.clone(),
            output_state: s1.clone(),
        }]
    );

    let again = service.compute(s0, i1, "h1").await.unwrap();
    assert_eq!(again, s1);
    assert_eq!(computation.calls(), 1);
    assert_eq!(store.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_input_different_states() {
    let store = store();
    let (service, computation) = service(&store);

    let input = Input::new(2, 'b');
    let s0 = State::new(0, 0);
    let s2 = State::new(100, 7);

    let s1 = service.compute(s0.clone(), input.clone(), "h1").await.unwrap();
    let s3 = service.compute(s2.clone(), input.clone(), "h1").await.unwrap();
    assert_eq!(s1, State::new(10, 1));
    assert_eq!(s3, State::new(110, 8));
    assert_eq!(computation.calls(), 2);

    assert_eq!(service.memo().lookup("h1", &input, &s0), Some(s1.clone()));
    assert_eq!(service.memo().lookup("h1", &input, &s2), Some(s3.clone()));

    assert_eq!(service.compute(s0, input.clone(), "h1").await.unwrap(), s1);
    assert_eq!(service.compute(s2, input, "h1").await.unwrap(), s3);
    assert_eq!(computation.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_memo_is_per_context() {
    let store = store();
    let (service, computation) = service(&store);

    let input = Input::new(1, 'c');
    let first = service
        .compute(State::default(), input.clone(), "h1")
        .await
        .unwrap();
    let second = service
        .compute(State::default(), input, "h2")
        .await
        .unwrap();

    assert_eq!(first, State::new(5, 1));
    assert_eq!(second, State::new(6, 1));
    assert_eq!(computation.calls(), 2);
    assert_eq!(service.memo().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_compute_in_place() {
    let store = store();
    let (service, computation) = service(&store);

    let mut state = State::default();
    service
        .compute_in_place(&mut state, Input::new(1, 'a'), "h1")
        .await
        .unwrap();
    assert_eq!(state, State::new(5, 1));

    service
        .compute_in_place(&mut state, Input::new(1, 'a'), "h1")
        .await
        .unwrap();
    assert_eq!(state, State::new(10, 2));
    assert_eq!(computation.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_errors_propagate() {
    let store = store();
    store.fail(
        "broken",
        FetchError::Transport("connection reset".to_owned()),
    );
    let (service, computation) = service(&store);

    let mut state = State::new(1, 1);
    let err = service
        .compute_in_place(&mut state, Input::new(1, 'a'), "missing")
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::NotFound);
    assert!(!err.is_retriable());
    assert_eq!(state, State::new(1, 1));

    let err = service
        .compute(State::default(), Input::new(1, 'a'), "broken")
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Transport("connection reset".to_owned()));
    assert!(err.is_retriable());

    assert_eq!(computation.calls(), 0);
    assert!(service.memo().is_empty());
    assert!(service.resolver().cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_computes_share_work() {
    let store = MockStore::with_latency(std::time::Duration::from_millis(10));
    store.insert("h1", "first");
    let store = Arc::new(store);
    let (service, computation) = service(&store);

    let input = Input::new(4, 'z');
    let (a, b, c) = futures::join!(
        service.compute(State::default(), input.clone(), "h1"),
        service.compute(State::default(), input.clone(), "h1"),
        service.compute(State::default(), input.clone(), "h1"),
    );

    let expected = State::new(20, 1);
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);
    assert_eq!(c.unwrap(), expected);
    assert_eq!(store.calls(), 1);
    assert_eq!(computation.calls(), 1);
    assert_eq!(service.memo().record_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closure_computation() {
    memoizer_test::setup();
    let store = store();
    let service = MemoService::new(
        &memoizer_test::config(),
        Arc::clone(&store),
        |state: &State, input: &Input, background: &Background| State {
            total: state.total + input.value + background.hash.len() as i64,
            steps: state.steps + 1,
        },
    );

    let state = service
        .compute(State::default(), Input::new(1, 'a'), "h2")
        .await
        .unwrap();
    assert_eq!(state, State::new(3, 1));
}
