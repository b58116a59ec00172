//! # Propflow Package Runner
//!
//! Runs a built-in package against simulated step handlers and streams progress to stdout.
//! Useful for exercising scheduling, retries, and control actions without external services.

use anyhow::{bail, Context, Result};
use clap::Parser;
use propflow_core::logging::init_structured_logging;
use propflow_core::{
    ControlAction, HandlerError, Orchestrator, OrchestrationEvent, OrchestratorConfig,
    Parameters, StepRegistry,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "propflow-run")]
#[command(about = "Run a built-in package with simulated step handlers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Package to run (new_listing, buyer_onboarding, market_report)
    #[arg(short, long, default_value = "new_listing")]
    package: String,

    /// Orchestrator configuration file (TOML, YAML, or JSON)
    #[arg(short, long, env = "PROPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Execution parameters as key=value; values are parsed as JSON when possible
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Make every invocation of this handler type fail
    #[arg(long, value_name = "HANDLER_TYPE")]
    fail_handler: Option<String>,

    /// Pause the execution after this many milliseconds, then resume it
    #[arg(long, value_name = "MS")]
    pause_after_ms: Option<u64>,

    /// Cancel the execution after this many milliseconds
    #[arg(long, value_name = "MS")]
    cancel_after_ms: Option<u64>,

    /// Seconds to wait for the execution to settle
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Print the final snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();
    let cli = Cli::parse();

    let config = OrchestratorConfig::load(cli.config.as_deref())
        .context("Failed to load orchestrator configuration")?;

    let registry = simulated_registry(cli.fail_handler.as_deref())?;
    let orchestrator = Orchestrator::new(config, registry)?;
    let registered = orchestrator.register_builtin_packages()?;
    info!(templates = registered, "Built-in packages registered");

    let parameters = parse_parameters(&cli.params)?;
    let mut events = orchestrator.subscribe();
    let execution_id = orchestrator.execute(&cli.package, parameters)?;
    println!("Started {} execution {execution_id}", cli.package);

    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OrchestrationEvent::TaskStatusChanged { task, .. })
                    if task.execution_id == execution_id =>
                {
                    println!(
                        "  {:<28} {:<10} attempt {}",
                        task.name,
                        task.status.to_string(),
                        task.attempts
                    );
                }
                Ok(OrchestrationEvent::ExecutionStatusChanged { execution_id: id, from, to, .. })
                    if id == execution_id =>
                {
                    println!("Execution {from} -> {to}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    println!("  ... {skipped} events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Some(delay) = cli.pause_after_ms {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        orchestrator.control(execution_id, ControlAction::Pause, Some("operator pause".into()))?;
        let paused = orchestrator.status(execution_id)?;
        println!(
            "Paused at {:.0}% ({} running tasks finishing)",
            paused.progress_percent,
            paused.running_tasks.len()
        );
        tokio::time::sleep(Duration::from_millis(delay)).await;
        orchestrator.control(execution_id, ControlAction::Resume, None)?;
    }

    if let Some(delay) = cli.cancel_after_ms {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        orchestrator.control(execution_id, ControlAction::Cancel, Some("operator cancel".into()))?;
    }

    let snapshot = orchestrator
        .wait_for_completion(execution_id, Duration::from_secs(cli.timeout_secs))
        .await?;
    orchestrator.shutdown().await;
    progress.abort();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "Execution {} finished {} ({:.0}% complete, {} failed, {} cancelled)",
            snapshot.execution_id,
            snapshot.status,
            snapshot.progress_percent,
            snapshot.failed_count,
            snapshot.cancelled_count
        );
        for failure in &snapshot.failures {
            println!("  {} failed: {}", failure.name, failure.error);
        }
    }

    Ok(())
}

/// Handlers that sleep briefly and echo what they did
fn simulated_registry(fail_handler: Option<&str>) -> Result<StepRegistry> {
    let registry = StepRegistry::new();

    for handler_type in propflow_core::packages::builtin_handler_types()? {
        let fails = fail_handler == Some(handler_type.as_str());
        let delay = Duration::from_millis(50 + 25 * (handler_type.len() as u64 % 8));
        let name = handler_type.clone();

        registry.register_fn(&handler_type, move |parameters, context| {
            let name = name.clone();
            async move {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = context.cancellation.cancelled() => {
                        return Err(HandlerError::permanent("cancelled"));
                    }
                }
                if fails {
                    return Err(HandlerError::new(format!("simulated {name} outage")));
                }

                let mut output = Parameters::new();
                output.insert("handler".into(), json!(name));
                output.insert("attempt".into(), json!(context.attempt));
                output.insert("inputs".into(), json!(parameters.len()));
                Ok(output)
            }
        });
    }

    Ok(registry)
}

fn parse_parameters(raw: &[String]) -> Result<Parameters> {
    let mut parameters = Parameters::new();

    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid parameter '{pair}', expected KEY=VALUE");
        };
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        parameters.insert(key.trim().to_string(), value);
    }

    // Demo identifiers so every built-in package runs without arguments
    for (key, value) in [
        ("property_id", json!("demo-property-1")),
        ("client_id", json!("demo-client-1")),
        ("area", json!("Downtown")),
    ] {
        parameters.entry(key).or_insert(value);
    }

    Ok(parameters)
}
