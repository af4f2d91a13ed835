//! Count/time batching as seen by the handler

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use contracts::{Message, Value};
use native_core::MockNativeCore;
use subscriber::SubscribeRequest;

use crate::support::{client, int_row, wait_for, Collector, HOST, PORT};

fn setup() -> (Arc<MockNativeCore>, Collector) {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    (core, Collector::new())
}

#[test]
fn test_no_buffering_delivers_each_row() {
    let (core, seen) = setup();
    let client = client(&core, 1);
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", seen.handler()).batch_size(0))
        .unwrap();

    for i in 0..5 {
        core.publish("trades", int_row(i));
        thread::sleep(Duration::from_millis(10));
    }
    assert!(wait_for(|| seen.calls() == 5));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(seen.call_sizes(), vec![1; 5]);
    assert_eq!(seen.ints(), vec![0, 1, 2, 3, 4]);
    assert!(seen
        .records()
        .iter()
        .all(|r| matches!(r.delivery.message, Message::Row(_))));
}

#[test]
fn test_no_buffering_splits_micro_batches() {
    let (core, seen) = setup();
    let client = client(&core, 1);
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", seen.handler()))
        .unwrap();

    // Published in one go, likely received as one micro-batch
    core.publish_all("trades", (0..4).map(int_row));
    assert!(wait_for(|| seen.calls() == 4));
    assert_eq!(seen.ints(), vec![0, 1, 2, 3]);
}

#[test]
fn test_count_trigger_then_throttle_flush() {
    let (core, seen) = setup();
    let client = client(&core, 1);
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .batch_size(3)
                .throttle(1.0),
        )
        .unwrap();

    let started = Instant::now();
    for i in 0..5 {
        core.publish("trades", int_row(i));
        thread::sleep(Duration::from_millis(30));
    }
    assert!(wait_for(|| seen.calls() == 2));
    thread::sleep(Duration::from_millis(100));

    assert_eq!(seen.call_sizes(), vec![3, 2]);
    assert_eq!(seen.ints(), vec![0, 1, 2, 3, 4]);
    let records = seen.records();
    // The remainder waits for the throttle, counted from its first row
    assert!(records[1].at.duration_since(started) >= Duration::from_millis(900));
    assert!(records
        .iter()
        .all(|r| matches!(r.delivery.message, Message::Rows(_))));
}

#[test]
fn test_time_trigger_flushes_partial_batch() {
    let (core, seen) = setup();
    let client = client(&core, 1);
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .batch_size(10)
                .throttle(0.5),
        )
        .unwrap();

    let started = Instant::now();
    core.publish("trades", int_row(0));
    core.publish("trades", int_row(1));
    thread::sleep(Duration::from_millis(600));

    assert!(wait_for(|| seen.calls() == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(seen.call_sizes(), vec![2]);
    assert!(seen.records()[0].at.duration_since(started) >= Duration::from_millis(450));
}

#[test]
fn test_large_burst_splits_by_count() {
    let (core, seen) = setup();
    let client = client(&core, 1);
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .batch_size(4)
                .throttle(0.1),
        )
        .unwrap();

    core.publish_all("trades", (0..10).map(int_row));
    assert!(wait_for(|| seen.rows_delivered() == 10));
    assert_eq!(seen.call_sizes(), vec![4, 4, 2]);
    assert_eq!(seen.ints(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_msg_as_table_passthrough_delivers_micro_batches() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("quotes", &["sym", "px"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "quotes", seen.handler())
                .msg_as_table(true)
                .offset(0),
        )
        .unwrap();

    core.publish_all(
        "quotes",
        [
            vec!["AAPL".into(), Value::Double(1.5)],
            vec!["MSFT".into(), Value::Double(2.5)],
        ],
    );
    assert!(wait_for(|| seen.rows_delivered() == 2));

    let Message::Table(table) = &seen.records()[0].delivery.message else {
        panic!("expected table payload");
    };
    assert_eq!(table.columns, vec!["sym".to_string(), "px".to_string()]);
    assert_eq!(table.column("sym").unwrap()[0], &Value::from("AAPL"));
}

#[test]
fn test_msg_as_table_with_batching() {
    let (core, seen) = setup();
    let client = client(&core, 1);
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .msg_as_table(true)
                .batch_size(2)
                .throttle(5.0),
        )
        .unwrap();

    core.publish_all("trades", (0..4).map(int_row));
    assert!(wait_for(|| seen.calls() == 2));
    for record in seen.records() {
        let Message::Table(table) = record.delivery.message else {
            panic!("expected table payload");
        };
        assert_eq!(table.num_rows(), 2);
    }
}

#[test]
fn test_huge_throttle_is_count_only_and_spares_other_topics() {
    let (core, slow) = setup();
    core.create_table("other", &["v"]);
    let other = Collector::new();
    let client = client(&core, 1);
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", slow.handler())
                .batch_size(3)
                .throttle(1e19),
        )
        .unwrap();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "other", other.handler()))
        .unwrap();

    core.publish("trades", int_row(1));
    core.publish("other", int_row(2));
    assert!(wait_for(|| other.ints() == vec![2]));

    // Only the count trigger can flush the large-throttle topic
    thread::sleep(Duration::from_millis(100));
    assert_eq!(slow.calls(), 0);
    core.publish_all("trades", (2..4).map(int_row));
    assert!(wait_for(|| slow.call_sizes() == vec![3]));
    assert_eq!(slow.ints(), vec![1, 2, 3]);
    assert_eq!(client.subscription_topics().len(), 2);
}
