//! Reconnect and site rotation end to end

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use contracts::{ConnectionState, SiteAddr, StreamError, Topic};
use native_core::{MockConfig, MockNativeCore};
use subscriber::SubscribeRequest;

use crate::support::{client, int_row, primary, wait_for, Collector, HOST, PORT};

fn site_b() -> SiteAddr {
    SiteAddr::new("backup-b", 8848)
}

fn site_c() -> SiteAddr {
    SiteAddr::new("backup-c", 8848)
}

fn topic() -> Topic {
    Topic::new(HOST, PORT, "trades", "")
}

fn request(seen: &Collector, sub_once: bool) -> SubscribeRequest {
    SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
        .offset(0)
        .backup_sites([site_b(), site_c()])
        .resubscribe_interval_ms(100)
        .sub_once(sub_once)
}

#[test]
fn test_reconnect_same_site_without_gaps_or_repeats() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .offset(0)
                .resubscribe_interval_ms(20),
        )
        .unwrap();

    core.publish_all("trades", (0..10).map(int_row));
    assert!(wait_for(|| seen.rows_delivered() == 10));

    core.drop_connections(&primary());
    core.publish_all("trades", (10..20).map(int_row));
    assert!(wait_for(|| seen.rows_delivered() == 20));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(seen.ints(), (0..20).collect::<Vec<_>>());
    // Resumed from the first undelivered offset
    let requests = core.subscribe_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].requested, 10);
    assert_eq!(requests[1].site, primary());
}

#[test]
fn test_failover_to_backup_continues_sequence() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client.subscribe(request(&seen, false)).unwrap();

    core.publish_all("trades", (0..5).map(int_row));
    assert!(wait_for(|| seen.rows_delivered() == 5));

    core.set_site_down(&primary(), true);
    core.publish_all("trades", (5..12).map(int_row));
    assert!(wait_for(|| seen.rows_delivered() == 12));

    assert_eq!(seen.ints(), (0..12).collect::<Vec<_>>());
    let status = client.subscription_status(&topic()).unwrap();
    assert_eq!(status.state, ConnectionState::Subscribed);
    assert_eq!(status.site, site_b());
    assert_eq!(status.site_index, 1);
    assert_eq!(
        client.topic_metrics(&topic()).unwrap().site_switches,
        1
    );
}

#[test]
fn test_failover_rotation_is_cyclic() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client.subscribe(request(&seen, false)).unwrap();

    for site in [site_b(), site_c(), primary()] {
        core.set_site_down(&site, true);
    }
    // A (initial), then B, C, A again
    assert!(wait_for(|| core.connect_attempts().len() >= 4));
    assert_eq!(
        core.connect_attempts()[..4],
        [primary(), site_b(), site_c(), primary()]
    );
    assert!(wait_for(|| client
        .subscription_status(&topic())
        .is_some_and(|s| s.state == ConnectionState::Reconnecting && s.reconnect_attempts >= 3)));

    // Rotation keeps going until a site comes back
    core.set_site_down(&site_c(), false);
    assert!(wait_for(|| client
        .subscription_status(&topic())
        .is_some_and(|s| s.state == ConnectionState::Subscribed)));
    assert_eq!(client.subscription_status(&topic()).unwrap().site, site_c());
}

#[test]
fn test_sub_once_never_returns_to_retired_site() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client.subscribe(request(&seen, true)).unwrap();

    // A fails, B takes over
    core.set_site_down(&primary(), true);
    assert!(wait_for(|| client
        .subscription_status(&topic())
        .is_some_and(|s| s.state == ConnectionState::Subscribed && s.site == site_b())));

    // A is back but retired; B fails, C is next
    core.set_site_down(&primary(), false);
    core.set_site_down(&site_b(), true);
    assert!(wait_for(|| client
        .subscription_status(&topic())
        .is_some_and(|s| s.state == ConnectionState::Subscribed && s.site == site_c())));

    core.publish("trades", int_row(42));
    assert!(wait_for(|| seen.ints() == vec![42]));

    // C fails with nothing left: terminal, removed, no further calls
    core.set_site_down(&site_c(), true);
    assert!(wait_for(|| client.subscription_topics().is_empty()));
    assert!(client.subscription_status(&topic()).is_none());

    core.set_site_down(&site_c(), false);
    core.publish("trades", int_row(43));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(seen.ints(), vec![42]);
    assert_eq!(
        core.connect_attempts(),
        vec![primary(), site_b(), site_c()]
    );
}

#[test]
fn test_sub_once_exhaustion_after_consecutive_failures() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client.subscribe(request(&seen, true)).unwrap();

    for site in [primary(), site_b(), site_c()] {
        core.set_site_down(&site, true);
    }
    assert!(wait_for(|| client.subscription_topics().is_empty()));
    assert_eq!(
        core.connect_attempts(),
        vec![primary(), site_b(), site_c()]
    );
    assert_eq!(core.open_connections(), 0);
}

#[test]
fn test_initial_failure_without_resub_surfaces_error() {
    let core = Arc::new(MockNativeCore::with_config(MockConfig {
        unreachable_sites: vec![primary()],
        ..Default::default()
    }));
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);

    let err = client
        .subscribe(request(&Collector::new(), false))
        .unwrap_err();
    assert!(matches!(err, StreamError::Connection { ref site, .. } if site == "localhost:8848"));
    assert!(client.subscription_topics().is_empty());
    // No background retries were scheduled
    thread::sleep(Duration::from_millis(200));
    assert_eq!(core.connect_attempts(), vec![primary()]);
}

#[test]
fn test_initial_failure_with_resub_fails_over() {
    let core = Arc::new(MockNativeCore::with_config(MockConfig {
        unreachable_sites: vec![primary()],
        ..Default::default()
    }));
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();

    client.subscribe(request(&seen, false).resub(true)).unwrap();
    assert!(wait_for(|| client
        .subscription_status(&topic())
        .is_some_and(|s| s.state == ConnectionState::Subscribed)));
    assert_eq!(client.subscription_status(&topic()).unwrap().site, site_b());

    core.publish("trades", int_row(1));
    assert!(wait_for(|| seen.ints() == vec![1]));
}

#[test]
fn test_buffered_rows_survive_reconnect() {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    let client = client(&core, 1);
    let seen = Collector::new();
    client
        .subscribe(
            SubscribeRequest::new(HOST, PORT, "trades", seen.handler())
                .offset(0)
                .batch_size(4)
                .throttle(10.0)
                .resubscribe_interval_ms(20),
        )
        .unwrap();

    core.publish_all("trades", (0..2).map(int_row));
    assert!(wait_for(|| client
        .topic_metrics(&topic())
        .is_some_and(|m| m.buffered_rows == 2)));

    core.drop_connections(&primary());
    core.publish_all("trades", (2..4).map(int_row));
    assert!(wait_for(|| seen.calls() == 1));
    assert_eq!(seen.ints(), vec![0, 1, 2, 3]);
}
