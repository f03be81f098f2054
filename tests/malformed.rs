mod common;

use common::{order, Accept, Pipeline, Recorder, RunningWorker, TOPIC};
use courier::broker::OutboundRecord;
use courier::dead_letter::{DeadLetterEntry, DeadLetterReason};
use courier::retry::BackoffPolicy;
use courier_config::PAYMENT_GROUP;

#[tokio::test]
async fn test_undecodable_record_is_dead_lettered_and_consumption_continues() {
    let pipeline = Pipeline::new(1, BackoffPolicy::default());
    let recorder = Recorder::new(Accept);

    pipeline
        .publisher
        .send_record(OutboundRecord::new(TOPIC, "o-bad", b"{not json".to_vec()))
        .await
        .unwrap();
    pipeline.publisher.publish(&order("o-good", "NEW")).await.unwrap();

    let worker = RunningWorker::spawn(pipeline.worker(PAYMENT_GROUP, recorder.clone()));
    let calls = recorder.wait_for_calls(1).await;
    common::eventually("both records committed", || {
        pipeline.broker.committed_offset(PAYMENT_GROUP, TOPIC, 0) == Some(2)
    })
    .await;
    worker.stop().await.unwrap();

    assert_eq!(calls[0].order_id, "o-good");
    assert_eq!(recorder.calls().len(), 1);

    let dead = pipeline.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason(), DeadLetterReason::Malformed);
    match &dead[0] {
        DeadLetterEntry::Malformed(entry) => {
            assert_eq!(entry.source_topic, TOPIC);
            assert_eq!(entry.offset, 0);
            assert_eq!(entry.key.as_deref(), Some("o-bad"));
            assert_eq!(entry.raw_payload, "{not json");
            assert!(!entry.error.is_empty());
        }
        other => panic!("unexpected dead letter {:?}", other),
    }

    // Malformed records skip the retry tiers entirely
    assert!(pipeline
        .broker
        .records(pipeline.router.topics().retry_tier(1).unwrap())
        .is_empty());
}
