//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{StreamingConfig, SubscriptionConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    client: ClientInfo,
    subscriptions: Vec<SubscriptionInfo>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    deserializers: BTreeMap<String, Vec<TagInfo>>,
}

#[derive(Serialize)]
struct ClientInfo {
    thread_count: usize,
    runtime: &'static str,
    poll_interval_ms: u64,
    authenticated: bool,
}

#[derive(Serialize)]
struct SubscriptionInfo {
    topic: String,
    offset: i64,
    delivery: String,
    msg_as_table: bool,
    resub: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    backup_sites: Vec<String>,
    sub_once: bool,
    resubscribe_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    deserializer: Option<String>,
}

#[derive(Serialize)]
struct TagInfo {
    tag: String,
    target: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&config, args.deserializers)?;
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(config: &StreamingConfig, with_deserializers: bool) -> Result<ConfigInfo> {
    let deserializers = if with_deserializers {
        config_loader::ConfigLoader::build_deserializers(config)?
            .into_iter()
            .map(|(name, de)| {
                let tags = de
                    .tags()
                    .filter_map(|tag| {
                        de.target(tag).map(|target| TagInfo {
                            tag: tag.to_string(),
                            target: target.to_string(),
                        })
                    })
                    .collect();
                (name, tags)
            })
            .collect()
    } else {
        BTreeMap::new()
    };

    Ok(ConfigInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        client: ClientInfo {
            thread_count: config.client.thread_count,
            runtime: if config.client.thread_count <= 1 {
                "single-threaded"
            } else {
                "pooled"
            },
            poll_interval_ms: config.client.poll_interval_ms,
            authenticated: config.client.credentials.is_some(),
        },
        subscriptions: config.subscriptions.iter().map(subscription_info).collect(),
        deserializers,
    })
}

fn subscription_info(sub: &SubscriptionConfig) -> SubscriptionInfo {
    let delivery = if sub.batch_size > 0 {
        format!("batch_size={} throttle={}s", sub.batch_size, sub.throttle)
    } else {
        "passthrough".to_string()
    };
    SubscriptionInfo {
        topic: sub.topic_string(),
        offset: sub.offset,
        delivery,
        msg_as_table: sub.msg_as_table,
        resub: sub.resub,
        backup_sites: sub.backup_sites.clone(),
        sub_once: sub.sub_once,
        resubscribe_interval_ms: sub.resubscribe_interval_ms,
        deserializer: sub.deserializer.clone(),
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Configuration Info ===\n");
    println!("Client:");
    println!(
        "  Runtime: {} ({} thread(s))",
        info.client.runtime, info.client.thread_count
    );
    println!("  Poll interval: {}ms", info.client.poll_interval_ms);
    if info.client.authenticated {
        println!("  Credentials: configured");
    }

    println!("\nSubscriptions ({}):", info.subscriptions.len());
    for sub in &info.subscriptions {
        println!("  - {}", sub.topic);
        println!("      offset: {}", sub.offset);
        println!("      delivery: {}", sub.delivery);
        if sub.msg_as_table {
            println!("      shape: table");
        }
        if !sub.backup_sites.is_empty() {
            println!(
                "      backups: {} (sub_once={}, interval={}ms)",
                sub.backup_sites.join(", "),
                sub.sub_once,
                sub.resubscribe_interval_ms
            );
        }
        if let Some(ref name) = sub.deserializer {
            println!("      deserializer: {}", name);
        }
    }

    if !info.deserializers.is_empty() {
        println!("\nDeserializers:");
        for (name, tags) in &info.deserializers {
            println!("  {}:", name);
            for tag in tags {
                println!("    {} -> {}", tag.tag, tag.target);
            }
        }
    }

    println!();
}
