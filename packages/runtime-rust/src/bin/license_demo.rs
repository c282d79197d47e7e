//! License lookup demo.
//!
//! Issues a stream of license lookups against a simulated repository that
//! runs long on roughly one call in three. Slow calls time out, trip the
//! breaker once the error threshold is crossed, and are answered from a
//! placeholder fallback while the circuit is open.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use guardrail_core::{ContextCarrier, OperationKey};
use guardrail_runtime::command::{CommandConfig, CommandExecutor};
use guardrail_runtime::context;
use guardrail_runtime::strategy::{Plugins, StaticProperties, StrategyRegistry};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LICENSE_COMMAND: &str = "licenseByOrgThreadPool";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of lookups to issue
    #[arg(short, long, default_value_t = 40)]
    requests: u32,

    /// Organizations to cycle through
    #[arg(short, long = "org", default_values_t = ["e254f8c-c442-4ebe-a82a-e2fc1d1ff78a".to_string()])]
    orgs: Vec<String>,

    /// JSON properties file with `defaults` and per-command overrides
    #[arg(short, long, env = "GUARDRAIL_PROPERTIES")]
    properties: Option<PathBuf>,

    /// Delay between lookups in milliseconds
    #[arg(long, default_value_t = 100)]
    pause_ms: u64,

    /// How long to wait for in-flight work at exit
    #[arg(long, default_value_t = 12_000)]
    shutdown_timeout_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "GUARDRAIL_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct License {
    license_id: String,
    organization_id: String,
    product_name: String,
    license_type: String,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,guardrail_runtime=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_properties(path: Option<&PathBuf>) -> Result<StaticProperties> {
    if let Some(path) = path {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading properties from {}", path.display()))?;
        return StaticProperties::from_json(&json)
            .with_context(|| format!("parsing properties in {}", path.display()));
    }
    Ok(StaticProperties::default().with_override(
        LICENSE_COMMAND,
        CommandConfig {
            core_size: 30,
            max_queue_size: 10,
            request_volume_threshold: 10,
            error_threshold_percentage: 75,
            sleep_window_ms: 7_000,
            rolling_window_ms: 15_000,
            num_buckets: 5,
            ..CommandConfig::default()
        },
    ))
}

/// Simulated repository call; one in three runs far past any timeout.
async fn licenses_by_org(organization_id: String) -> Result<Vec<License>> {
    let slow = rand::rng().random_range(1..=3) == 3;
    let delay = if slow {
        Duration::from_secs(11)
    } else {
        Duration::from_millis(rand::rng().random_range(20..80))
    };
    let correlation_id = context::capture()
        .correlation_id()
        .unwrap_or("-")
        .to_string();
    tracing::debug!(org = %organization_id, correlation_id = %correlation_id, slow, "querying license repository");
    tokio::time::sleep(delay).await;

    Ok(vec![License {
        license_id: "f3831f8c-c338-4ebe-a82a-e2fc1d1ff78a".to_string(),
        organization_id,
        product_name: "CustomerPro".to_string(),
        license_type: "user".to_string(),
    }])
}

async fn placeholder_licenses(organization_id: String) -> Result<Vec<License>> {
    Ok(vec![License {
        license_id: "0000000-00-00000".to_string(),
        organization_id,
        product_name: "Sorry no licensing information currently available".to_string(),
        license_type: String::new(),
    }])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let properties = load_properties(cli.properties.as_ref())?;
    let plugins = Plugins::new(
        StrategyRegistry::builder()
            .properties(Arc::new(properties))
            .build(),
    );
    plugins
        .install_context_propagation()
        .context("installing context propagation")?;
    let executor = CommandExecutor::new(Arc::new(plugins));
    let key = OperationKey::new(LICENSE_COMMAND);

    info!(requests = cli.requests, "starting license lookups");
    let mut degraded = 0u32;
    for (n, org) in (0..cli.requests).zip(cli.orgs.iter().cycle()) {
        let carrier = ContextCarrier::builder()
            .generated_correlation_id()
            .organization_id(org.clone())
            .build();
        let org = org.clone();

        let result = context::scope(
            carrier,
            executor.execute_with_fallback(&key, org, licenses_by_org, placeholder_licenses),
        )
        .await;

        match result {
            Ok(outcome) => {
                if let Some(cause) = outcome.fallback_cause() {
                    degraded += 1;
                    warn!(request = n, cause = %cause, "served placeholder licenses");
                }
                info!(
                    request = n,
                    licenses = %serde_json::to_string(outcome.value())?,
                    "lookup complete"
                );
            }
            Err(e) => warn!(request = n, error = %e, "lookup failed"),
        }
        if let Some(breaker) = executor.breaker(&key) {
            let health = breaker.health();
            tracing::debug!(
                state = breaker.state().as_str(),
                total = health.total,
                error_percentage = health.error_percentage,
                "breaker health"
            );
        }
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(cli.pause_ms)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping lookups");
                break;
            }
        }
    }

    info!(degraded, total = cli.requests, "lookups finished, draining workers");
    let drained = executor
        .shutdown(Duration::from_millis(cli.shutdown_timeout_ms))
        .await;
    if !drained {
        warn!("shutdown timed out with work still in flight");
    }
    Ok(())
}
