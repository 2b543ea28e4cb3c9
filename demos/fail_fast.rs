//! Fail-Fast Example
//!
//! With mismatch raising on, a divergent candidate stops the run after the
//! result is published, the way a test suite would want it to.
//!
//! Run with: cargo run --example fail_fast

use trueno_science::{
    DefaultPublisher, Experiment, ExperimentConfig, MismatchError, RunError,
};

fn main() {
    println!("=== Trueno-Science Fail-Fast ===\n");

    let config = ExperimentConfig::builder().raise_on_mismatches(true).build();
    let mut experiment: Experiment<String> =
        Experiment::with_config("slugify", DefaultPublisher::new(true), config);

    let title = "Hello, World!";
    experiment
        .use_control(move || {
            Ok(title
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("-"))
        })
        .expect("fresh experiment");
    experiment
        .candidate(move || Ok(title.to_lowercase().replace(' ', "-")))
        .expect("unique name");

    match experiment.run() {
        Ok(slug) => println!("Matched: {slug}"),
        Err(RunError::Mismatch(error)) => {
            println!("{error}");
            if let Some(mismatch) = error.downcast_ref::<MismatchError<String, anyhow::Error>>() {
                println!(
                    "Mismatched candidates: {}",
                    mismatch.result().mismatched().len()
                );
            }
        }
        Err(other) => println!("Run failed: {other}"),
    }
}
