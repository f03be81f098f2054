mod common;

use common::{order, Pipeline, Recorder, Reject, TOPIC};
use courier::retry::BackoffPolicy;
use courier_config::PAYMENT_GROUP;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test(start_paused = true)]
async fn test_unroutable_failure_stops_worker_without_committing() {
    let pipeline = Pipeline::new(1, BackoffPolicy::default());
    let recorder = Recorder::new(Reject);

    pipeline.publisher.publish(&order("o1", "NEW")).await.unwrap();
    // Every retry-tier write fails from here on
    pipeline.broker.fail_next_sends(100);

    let (_tx, rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.worker(PAYMENT_GROUP, recorder.clone()).run(rx));

    let result = tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("worker kept running after routing failure")
        .unwrap();
    assert!(result.is_err());

    assert_eq!(recorder.calls().len(), 1);
    assert_eq!(pipeline.broker.committed_offset(PAYMENT_GROUP, TOPIC, 0), None);
    assert_eq!(pipeline.broker.member_count(PAYMENT_GROUP, TOPIC), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_send_failure_is_retried_by_the_router() {
    let pipeline = Pipeline::new(1, BackoffPolicy::default());
    let recorder = Recorder::new(Reject);
    let retry_topic = pipeline.router.topics().retry_tier(1).unwrap().to_string();

    pipeline.publisher.publish(&order("o1", "NEW")).await.unwrap();
    pipeline.broker.fail_next_sends(2);

    let worker = common::RunningWorker::spawn(pipeline.worker(PAYMENT_GROUP, recorder.clone()));
    common::eventually("retry scheduled", || !pipeline.broker.records(&retry_topic).is_empty()).await;
    worker.stop().await.unwrap();

    assert_eq!(pipeline.broker.committed_offset(PAYMENT_GROUP, TOPIC, 0), Some(1));
}
