use scout::{
    Config, IntakeError, Request, ScoutError,
    testing::{ConcurrencyProbe, TestAsset},
};
use std::time::Duration;

mod common;
use common::{Harness, eventually};

fn config_with_concurrency(concurrency: usize) -> Config {
    let mut config = Config::default();
    config.engine.concurrency = concurrency;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_limit() {
    let harness = Harness::new(config_with_concurrency(3));
    let discovery = &harness.discovery;
    let probe = ConcurrencyProbe::new(Duration::from_millis(20));
    discovery.start_with(probe.clone()).unwrap();
    let session = discovery.create_session();

    let submitter = discovery.submitter();
    for i in 0..12 {
        submitter
            .submit(Request::new(session.id(), TestAsset::fqdn(format!("host{i}.example"))))
            .await
            .unwrap();
    }
    eventually(|| probe.handled() == 12).await;

    assert!(probe.high_water_mark() <= 3, "peak was {}", probe.high_water_mark());
    assert!(probe.high_water_mark() >= 1);
    discovery.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_generous_grace_lets_handlers_finish() {
    let harness = Harness::new(config_with_concurrency(4));
    let discovery = &harness.discovery;
    let probe = ConcurrencyProbe::new(Duration::from_millis(100));
    discovery.start_with(probe.clone()).unwrap();
    let session = discovery.create_session();

    for i in 0..4 {
        discovery
            .submit(Request::new(session.id(), TestAsset::fqdn(format!("slow{i}.example"))))
            .await
            .unwrap();
    }
    eventually(|| probe.in_flight() == 4).await;

    discovery.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(probe.handled(), 4);
    assert_eq!(discovery.engine().in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_grace_cancels_promptly() {
    let harness = Harness::new(config_with_concurrency(2));
    let discovery = &harness.discovery;
    let probe = ConcurrencyProbe::new(Duration::from_secs(30));
    discovery.start_with(probe.clone()).unwrap();
    let session = discovery.create_session();

    for i in 0..2 {
        discovery
            .submit(Request::new(session.id(), TestAsset::fqdn(format!("stuck{i}.example"))))
            .await
            .unwrap();
    }
    eventually(|| probe.in_flight() == 2).await;

    let result = tokio::time::timeout(Duration::from_secs(1), discovery.shutdown(Duration::ZERO))
        .await
        .expect("shutdown must not wait for handlers");
    assert!(matches!(
        result,
        Err(ScoutError::Intake(IntakeError::DrainTimeout { in_flight: 2 }))
    ));
    assert_eq!(probe.handled(), 0);
}

#[tokio::test]
async fn test_submit_after_shutdown_is_refused() {
    let harness = Harness::new(Config::default());
    let discovery = &harness.discovery;
    discovery.start().unwrap();
    let session = discovery.create_session();
    discovery.shutdown(Duration::from_millis(10)).await.unwrap();

    let err = discovery
        .submit(Request::new(session.id(), TestAsset::fqdn("late.example")))
        .await
        .unwrap_err();
    assert_eq!(err, IntakeError::Closed);
}
