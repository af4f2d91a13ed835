//! Subscription lifecycle: uniqueness, resubscription, cancellation, runtimes

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use contracts::{
    ClientConfig, ConnectionState, Credentials, HandlerError, SiteAddr, StreamError, Topic,
};
use native_core::{MockConfig, MockNativeCore};
use subscriber::{RuntimeKind, StreamingClient, SubscribeRequest};

use crate::support::{client, int_row, primary, wait_for, Blocker, Collector, HOST, PORT};

#[test]
fn test_duplicate_subscription_rejected_without_resub() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let first = Collector::new();
    let second = Collector::new();

    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", first.handler()).action("demo"))
        .unwrap();
    let err = client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", second.handler()).action("demo"))
        .unwrap_err();
    assert!(matches!(err, StreamError::DuplicateSubscription { ref topic } if topic == "localhost/8848/trades/demo"));

    // Another action is another topic
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", second.handler()).action("other"))
        .unwrap();
    assert_eq!(
        client.subscription_topics(),
        vec!["localhost/8848/trades/demo", "localhost/8848/trades/other"]
    );
}

#[test]
fn test_resub_replaces_existing_subscription() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let old = Collector::new();
    let new = Collector::new();

    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", old.handler()))
        .unwrap();
    core.publish("trades", int_row(0));
    assert!(wait_for(|| old.calls() == 1));

    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", new.handler()).resub(true))
        .unwrap();
    core.publish("trades", int_row(1));
    assert!(wait_for(|| new.calls() == 1));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(old.ints(), vec![0]);
    assert_eq!(new.ints(), vec![1]);
    assert_eq!(client.subscription_topics().len(), 1);
    // The replaced connection is closed without a server-side unsubscribe
    assert!(wait_for(|| core.open_connections() == 1));
    assert!(core.unsubscribe_requests().is_empty());
}

#[test]
fn test_unsubscribe_is_idempotent_and_stops_delivery() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();

    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", seen.handler()))
        .unwrap();
    for i in 0..3 {
        core.publish("trades", int_row(i));
    }
    assert!(wait_for(|| seen.calls() == 3));

    client.unsubscribe(HOST, PORT, "trades", "");
    let calls_at_return = seen.calls();
    client.unsubscribe(HOST, PORT, "trades", "");

    for i in 3..10 {
        core.publish("trades", int_row(i));
    }
    thread::sleep(Duration::from_millis(100));

    // Nothing was in flight at return, so nothing more is admitted
    assert_eq!(seen.calls(), calls_at_return);
    assert!(client.subscription_topics().is_empty());
    assert!(wait_for(|| core.unsubscribe_requests().len() == 1));
    assert!(wait_for(|| core.open_connections() == 0));
}

#[test]
fn test_unsubscribe_during_handler_call_admits_nothing_more() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let blocker = Blocker::new();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", blocker.handler()).offset(0))
        .unwrap();

    core.publish("trades", int_row(0));
    assert!(wait_for(|| blocker.entered() == 1));
    // Rows already received behind the call in flight
    core.publish_all("trades", (1..4).map(int_row));

    // Does not wait for the running call
    let started = Instant::now();
    client.unsubscribe(HOST, PORT, "trades", "");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(client.subscription_topics().is_empty());

    blocker.release();
    assert!(wait_for(|| core.open_connections() == 0));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(blocker.entered(), 1);
}

#[test]
fn test_unsubscribe_unknown_topic_is_noop() {
    let core = Arc::new(MockNativeCore::new());
    let client = client(&core, 1);
    client.unsubscribe(HOST, PORT, "never", "");
    client.unsubscribe_topic(&Topic::new("other", 1, "t", "a"));
    assert!(client.subscription_topics().is_empty());
}

#[test]
fn test_unsubscribe_from_inside_handler() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = Arc::new(client(&core, 1));
    let seen = Collector::new();

    let record = seen.handler();
    let weak = Arc::downgrade(&client);
    let handler: contracts::MessageHandler = Arc::new(move |delivery: contracts::Delivery| -> Result<(), HandlerError> {
        record(delivery)?;
        if let Some(client) = weak.upgrade() {
            client.unsubscribe(HOST, PORT, "trades", "");
        }
        Ok(())
    });

    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", handler).batch_size(1))
        .unwrap();
    for i in 0..5 {
        core.publish("trades", int_row(i));
    }

    assert!(wait_for(|| client.subscription_topics().is_empty()));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(seen.calls(), 1);
}

#[test]
fn test_handler_errors_do_not_stop_delivery() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();

    let record = seen.handler();
    let handler: contracts::MessageHandler = Arc::new(move |delivery: contracts::Delivery| -> Result<(), HandlerError> {
        let first = delivery.message.clone().into_rows()[0][0] == contracts::Value::Int(0);
        record(delivery)?;
        if first {
            return Err("rejecting first row".into());
        }
        Ok(())
    });
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", handler))
        .unwrap();
    for i in 0..3 {
        core.publish("trades", int_row(i));
    }
    assert!(wait_for(|| seen.calls() == 3));
    assert_eq!(seen.ints(), vec![0, 1, 2]);

    let metrics = client
        .topic_metrics(&Topic::new(HOST, PORT, "trades", ""))
        .unwrap();
    assert_eq!(metrics.handler_failures, 1);
    assert_eq!(metrics.handler_calls, 3);
    assert_eq!(metrics.rows_delivered, 2);
}

#[test]
fn test_panicking_handler_is_isolated() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("a", &["v"]);
    core.create_table("b", &["v"]);
    let client = client(&core, 1);
    let healthy = Collector::new();

    let panicking: contracts::MessageHandler =
        Arc::new(|_: contracts::Delivery| -> Result<(), HandlerError> { panic!("handler bug") });
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "a", panicking))
        .unwrap();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "b", healthy.handler()))
        .unwrap();

    core.publish("a", int_row(0));
    core.publish("b", int_row(1));
    core.publish("a", int_row(2));
    core.publish("b", int_row(3));

    assert!(wait_for(|| healthy.calls() == 2));
    assert_eq!(healthy.ints(), vec![1, 3]);
    assert_eq!(client.subscription_topics().len(), 2);
}

#[test]
fn test_pooled_runtime_keeps_topic_on_one_thread() {
    let core = Arc::new(MockNativeCore::new());
    let client = client(&core, 3);
    assert_eq!(client.runtime_kind(), RuntimeKind::Pooled { threads: 3 });

    let seen = Collector::new();
    let tables: Vec<String> = (0..6).map(|i| format!("t{i}")).collect();
    for table in &tables {
        core.create_table(table, &["v"]);
        client
            .subscribe(SubscribeRequest::new(HOST, PORT, table, seen.handler()))
            .unwrap();
    }
    for i in 0..10 {
        for table in &tables {
            core.publish(table, int_row(i));
        }
    }
    assert!(wait_for(|| seen.calls() == 60));

    let mut per_topic: BTreeMap<String, (BTreeSet<String>, Vec<i64>)> = BTreeMap::new();
    for record in seen.records() {
        let entry = per_topic.entry(record.delivery.topic.to_string()).or_default();
        entry.0.insert(record.thread.unwrap_or_default());
        if let Some(contracts::Value::Int(v)) = record.delivery.message.into_rows()[0].first() {
            entry.1.push(*v);
        }
    }

    let mut threads = BTreeSet::new();
    for (topic, (names, values)) in &per_topic {
        assert_eq!(names.len(), 1, "{topic} delivered on {names:?}");
        assert_eq!(values, &(0..10).collect::<Vec<_>>(), "{topic} out of order");
        threads.extend(names.iter().cloned());
    }
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|t| t.starts_with("stream-sub-worker-")));
}

#[test]
fn test_single_threaded_runtime_serves_all_topics() {
    let core = Arc::new(MockNativeCore::new());
    let client = client(&core, 1);
    assert_eq!(client.runtime_kind(), RuntimeKind::SingleThreaded);

    let seen = Collector::new();
    for table in ["x", "y"] {
        core.create_table(table, &["v"]);
        client
            .subscribe(SubscribeRequest::new(HOST, PORT, table, seen.handler()))
            .unwrap();
        core.publish(table, int_row(1));
    }
    assert!(wait_for(|| seen.calls() == 2));
    let threads: BTreeSet<_> = seen.records().into_iter().map(|r| r.thread).collect();
    assert_eq!(threads.len(), 1);
}

#[test]
fn test_single_threaded_blocking_handler_delays_other_topics() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("a", &["v"]);
    core.create_table("b", &["v"]);
    let client = client(&core, 1);
    let blocker = Blocker::new();
    let seen = Collector::new();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "a", blocker.handler()))
        .unwrap();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "b", seen.handler()))
        .unwrap();

    core.publish("a", int_row(1));
    assert!(wait_for(|| blocker.entered() == 1));
    core.publish("b", int_row(2));

    // One thread: b waits behind a's handler
    thread::sleep(Duration::from_millis(300));
    assert_eq!(seen.calls(), 0);

    blocker.release();
    assert!(wait_for(|| seen.ints() == vec![2]));
}

#[test]
fn test_pooled_blocking_handler_does_not_delay_other_workers() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("a", &["v"]);
    core.create_table("b", &["v"]);
    let client = client(&core, 2);
    let blocker = Blocker::new();
    let seen = Collector::new();
    // Round-robin: a on worker 0, b on worker 1
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "a", blocker.handler()))
        .unwrap();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "b", seen.handler()))
        .unwrap();

    core.publish("a", int_row(1));
    assert!(wait_for(|| blocker.entered() == 1));

    let published = Instant::now();
    for i in 0..3 {
        core.publish("b", int_row(i));
    }
    assert!(wait_for(|| seen.rows_delivered() == 3));
    assert!(published.elapsed() < Duration::from_secs(1));
    assert_eq!(seen.ints(), vec![0, 1, 2]);
    // a is still stuck in its first call
    assert_eq!(blocker.entered(), 1);

    blocker.release();
    core.publish("a", int_row(2));
    assert!(wait_for(|| blocker.entered() == 2));
}

#[test]
fn test_pooled_lost_connection_does_not_delay_other_workers() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("a", &["v"]);
    core.create_table("b", &["v"]);
    let client = client(&core, 2);
    let flaky = SiteAddr::new("flaky", PORT);
    let broken = Collector::new();
    let seen = Collector::new();
    client
        .subscribe(
            SubscribeRequest::new(&flaky.host, flaky.port, "a", broken.handler())
                .resubscribe_interval_ms(50),
        )
        .unwrap();
    client
        .subscribe(SubscribeRequest::new(HOST, PORT, "b", seen.handler()))
        .unwrap();

    core.set_site_down(&flaky, true);
    let topic_a = Topic::new("flaky", PORT, "a", "");
    assert!(wait_for(|| client
        .subscription_status(&topic_a)
        .is_some_and(|s| s.state == ConnectionState::Reconnecting)));

    let published = Instant::now();
    core.publish_all("b", (0..5).map(int_row));
    assert!(wait_for(|| seen.rows_delivered() == 5));
    assert!(published.elapsed() < Duration::from_secs(1));
    assert_eq!(broken.calls(), 0);

    core.set_site_down(&flaky, false);
    core.publish("a", int_row(9));
    assert!(wait_for(|| broken.ints() == vec![9]));
}

#[test]
fn test_credentials_forwarded_to_core() {
    let creds = Credentials {
        user: "admin".into(),
        password: "123456".into(),
    };
    let core = Arc::new(MockNativeCore::with_config(MockConfig {
        required_credentials: Some(creds.clone()),
        ..Default::default()
    }));
    core.create_table("trades", &["v"]);

    let anonymous = client(&core, 1);
    let err = anonymous
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", Collector::new().handler()))
        .unwrap_err();
    assert!(matches!(err, StreamError::Connection { .. }));

    let config = ClientConfig {
        credentials: Some(creds),
        poll_interval_ms: 5,
        ..Default::default()
    };
    let authed = StreamingClient::new(core.clone(), config).unwrap();
    authed
        .subscribe(SubscribeRequest::new(HOST, PORT, "trades", Collector::new().handler()))
        .unwrap();
    let status = authed
        .subscription_status(&Topic::new(HOST, PORT, "trades", ""))
        .unwrap();
    assert_eq!(status.state, ConnectionState::Subscribed);
    assert_eq!(status.site, primary());
}

#[test]
fn test_filter_forwarded_to_core() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["sym", "px"]);
    let client = client(&core, 1);
    let seen = Collector::new();

    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .filter(vec![contracts::Value::from("AAPL")]),
        )
        .unwrap();
    for (sym, px) in [("AAPL", 1.0), ("MSFT", 2.0), ("AAPL", 3.0)] {
        core.publish("trades", vec![sym.into(), contracts::Value::Double(px)]);
    }
    assert!(wait_for(|| seen.calls() == 2));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(seen.calls(), 2);
}

#[test]
fn test_shutdown_clears_everything() {
    let core = Arc::new(MockNativeCore::new());
    let client = client(&core, 2);
    for table in ["a", "b", "c"] {
        core.create_table(table, &["v"]);
        client
            .subscribe(SubscribeRequest::new(HOST, PORT, table, Collector::new().handler()))
            .unwrap();
    }
    assert_eq!(core.open_connections(), 3);

    client.shutdown();
    client.shutdown();
    assert!(client.subscription_topics().is_empty());
    assert_eq!(core.open_connections(), 0);
    assert_eq!(core.unsubscribe_requests().len(), 3);
}
