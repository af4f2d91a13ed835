//! Config file to live subscriptions

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{StreamingConfig, TableSchema, Topic, Value};
use native_core::MockNativeCore;
use stream_deserializer::StreamDeserializer;
use subscriber::{StreamingClient, SubscribeRequest};
use tempfile::NamedTempFile;

use crate::support::{int_row, wait_for, Collector};

const CONFIG: &str = r#"
[client]
thread_count = 2
poll_interval_ms = 5

[[subscriptions]]
host = "localhost"
port = 8848
table = "trades"
action = "filtered"
offset = 0
filter = [1, 3]

[[subscriptions]]
host = "localhost"
port = 8848
table = "mixed"
action = "demux"
offset = 0
batch_size = 2
throttle = 0.2
deserializer = "mixed"

[deserializers.mixed]
msg1 = ["", "t1"]
msg2 = ["", "t2"]
"#;

fn write_config(content: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn core() -> Arc<MockNativeCore> {
    let core = Arc::new(MockNativeCore::new());
    core.create_table("trades", &["v"]);
    core.create_table("mixed", &["v", "tag"]);
    core.register_schema(TableSchema::new("", "t1", &["v"]));
    core.register_schema(TableSchema::new("", "t2", &["v"]));
    core
}

/// Subscribe every configured topic, one collector each
fn subscribe_all(
    client: &StreamingClient,
    config: &StreamingConfig,
    deserializers: &BTreeMap<String, StreamDeserializer>,
) -> Vec<Collector> {
    config
        .subscriptions
        .iter()
        .map(|sub| {
            let seen = Collector::new();
            let deserializer = sub
                .deserializer
                .as_ref()
                .and_then(|name| deserializers.get(name).cloned());
            let request = SubscribeRequest::from_config(sub, deserializer, seen.handler()).unwrap();
            client.subscribe(request).unwrap();
            seen
        })
        .collect()
}

#[test]
fn test_toml_file_drives_subscriptions() {
    let file = write_config(CONFIG, ".toml");
    let config = ConfigLoader::load_from_path(file.path()).unwrap();
    let deserializers = ConfigLoader::build_deserializers(&config).unwrap();
    assert_eq!(deserializers["mixed"].len(), 2);

    let core = core();
    let client = StreamingClient::new(core.clone(), config.client.clone()).unwrap();
    let collectors = subscribe_all(&client, &config, &deserializers);
    assert_eq!(
        client.subscription_topics(),
        vec![
            "localhost/8848/mixed/demux".to_string(),
            "localhost/8848/trades/filtered".to_string(),
        ]
    );

    core.publish_all("trades", (0..5).map(int_row));
    core.publish_all(
        "mixed",
        [
            vec![Value::Int(10), Value::from("msg1")],
            vec![Value::Int(20), Value::from("msg2")],
            vec![Value::Int(11), Value::from("msg1")],
        ],
    );

    // Filter keeps only keys 1 and 3
    assert!(wait_for(|| collectors[0].ints() == vec![1, 3]));

    // msg1 fills its batch of two, msg2 flushes on the 200ms timer
    assert!(wait_for(|| collectors[1].rows_delivered() == 3));
    let mut by_tag: Vec<(String, Vec<i64>)> = collectors[1]
        .records()
        .into_iter()
        .map(|r| {
            let ints = r
                .delivery
                .message
                .into_rows()
                .into_iter()
                .filter_map(|row| match row.first() {
                    Some(Value::Int(v)) => Some(*v),
                    _ => None,
                })
                .collect();
            (r.delivery.tag.unwrap_or_default(), ints)
        })
        .collect();
    by_tag.sort();
    assert_eq!(
        by_tag,
        vec![
            ("msg1".to_string(), vec![10, 11]),
            ("msg2".to_string(), vec![20]),
        ]
    );

    let metrics = client
        .topic_metrics(&Topic::new("localhost", 8848, "mixed", "demux"))
        .unwrap();
    assert_eq!(metrics.rows_received, 3);
    assert_eq!(metrics.rows_dropped, 0);
}

#[test]
fn test_json_config_round_trips_through_toml() {
    let json = r#"{
        "client": { "thread_count": 1, "poll_interval_ms": 5 },
        "subscriptions": [{
            "host": "localhost",
            "port": 8848,
            "table": "trades",
            "filter": [2],
            "offset": 0,
            "backup_sites": ["replica:8849"],
            "resub": true
        }]
    }"#;
    let file = write_config(json, ".json");
    let config = ConfigLoader::load_from_path(file.path()).unwrap();

    let toml = ConfigLoader::to_toml(&config).unwrap();
    let reparsed = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
    assert_eq!(reparsed.subscriptions[0].filter, Some(vec![Value::Int(2)]));
    assert_eq!(reparsed.subscriptions[0].backup_sites, vec!["replica:8849"]);

    let core = core();
    let client = StreamingClient::new(core.clone(), reparsed.client.clone()).unwrap();
    let collectors = subscribe_all(&client, &reparsed, &BTreeMap::new());
    core.publish_all("trades", (0..4).map(int_row));
    assert!(wait_for(|| collectors[0].ints() == vec![2]));
}

#[test]
fn test_invalid_config_is_rejected_before_subscribing() {
    let content = r#"
[[subscriptions]]
host = "localhost"
port = 8848
table = "mixed"
deserializer = "missing"
"#;
    let file = write_config(content, ".toml");
    let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}
