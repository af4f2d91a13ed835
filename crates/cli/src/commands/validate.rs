//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::StreamingConfig;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    thread_count: usize,
    subscription_count: usize,
    deserializer_count: usize,
    backup_site_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    thread_count: config.client.thread_count,
                    subscription_count: config.subscriptions.len(),
                    deserializer_count: config.deserializers.len(),
                    backup_site_count: config
                        .subscriptions
                        .iter()
                        .map(|s| s.backup_sites.len())
                        .sum(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &StreamingConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.subscriptions.is_empty() {
        warnings.push("No subscriptions configured - nothing will be received".to_string());
    }

    for sub in &config.subscriptions {
        let topic = sub.topic_string();
        if sub.sub_once && sub.backup_sites.is_empty() {
            warnings.push(format!(
                "'{topic}': sub_once has no effect without backup_sites"
            ));
        }
        if sub.batch_size > 0 && sub.throttle == 0.0 {
            warnings.push(format!(
                "'{topic}': throttle = 0 flushes partial batches on every poll"
            ));
        }
    }

    let referenced: BTreeSet<&str> = config
        .subscriptions
        .iter()
        .filter_map(|s| s.deserializer.as_deref())
        .collect();
    for name in config.deserializers.keys() {
        if !referenced.contains(name.as_str()) {
            warnings.push(format!("Deserializer '{name}' is not used by any subscription"));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Threads: {}", summary.thread_count);
            println!("  Subscriptions: {}", summary.subscription_count);
            println!("  Deserializers: {}", summary.deserializer_count);
            println!("  Backup sites: {}", summary.backup_site_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
