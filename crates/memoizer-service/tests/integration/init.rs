use std::time::Duration;

use memoizer_service::metric;

#[test]
fn test_init_reports_to_statsd() {
    let mut config = memoizer_test::config();
    config.metrics.statsd = Some("127.0.0.1:8125".into());
    config.metrics.custom_tags.insert("env".into(), "test".into());

    let sentry = memoizer_service::init(&config).unwrap();
    assert!(sentry.is_none());

    metric!(counter("memo.hit") += 1);
    metric!(timer("memo.compute.duration") = Duration::from_millis(1));

    // metrics are configured once per process
    let err = memoizer_service::init(&config)
        .err()
        .expect("second init should fail");
    assert!(err.to_string().contains("already configured"));
}
