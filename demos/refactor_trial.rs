//! Refactor Trial Example
//!
//! Runs a legacy permission check against a rewritten one on a batch of
//! requests. Callers only ever see the legacy answer; every run is published
//! as a JSON report through `tracing`.
//!
//! Run with: RUST_LOG=debug cargo run --example refactor_trial

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use trueno_science::{Experiment, ExperimentResult, HookError, Operation, Publisher};

/// Publisher that logs each result as a JSON report and swallows hook failures.
struct LoggingPublisher;

impl Publisher<bool, anyhow::Error> for LoggingPublisher {
    fn enabled(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn publish(&self, result: &ExperimentResult<bool, anyhow::Error>) -> anyhow::Result<()> {
        let report = result.report().to_json()?;
        info!(experiment = result.experiment_name(), report = %report, "published");
        Ok(())
    }

    fn raised(&self, operation: Operation, error: HookError) -> Result<(), HookError> {
        tracing::error!(%operation, %error, "experiment hook failed");
        Ok(())
    }
}

fn legacy_can_edit(user: &str, admins: &[&str]) -> bool {
    admins.iter().any(|admin| *admin == user)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    println!("=== Trueno-Science Refactor Trial ===\n");

    let admins: Arc<Vec<&'static str>> = Arc::new(vec!["alice", "bob", "Carol"]);
    let fast: Arc<HashSet<String>> =
        Arc::new(admins.iter().map(|a| a.to_lowercase()).collect());

    for user in ["alice", "mallory", "carol"] {
        let mut experiment: Experiment<bool, anyhow::Error, LoggingPublisher> =
            Experiment::with_publisher("can-edit", LoggingPublisher);
        experiment.add_context("user", user)?;

        let legacy = Arc::clone(&admins);
        experiment.use_control(move || Ok(legacy_can_edit(user, &legacy)))?;

        let rewrite = Arc::clone(&fast);
        experiment.candidate(move || Ok(rewrite.contains(&user.to_lowercase())))?;

        let allowed = experiment.run().map_err(|e| anyhow::anyhow!("{e}"))?;
        println!("  {user:<8} can edit: {allowed}");
    }

    println!("\nThe rewrite lowercases names, so \"carol\" mismatches; see the report logs.");
    Ok(())
}
