//! # Trueno-Science: Production Experiments for Risky Refactors
//!
//! **Version**: 0.1.0
//!
//! Trueno-Science runs a trusted *control* code path and one or more
//! *candidate* rewrites side by side, records what each one did, compares
//! them and hands the verdict to a [`Publisher`]. Callers always get exactly
//! the control's outcome; a candidate's error, panic or divergence never
//! reaches them.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: Opt-in fail-fast mode stops the line on the first mismatch in tests
//! - **Poka-Yoke safety**: Candidate failures are captured, never propagated
//! - **Genchi Genbutsu**: Compare real production outcomes, not synthetic fixtures
//! - **Heijunka**: Behaviors run in shuffled order so none is systematically favored
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_science::{DefaultPublisher, Experiment};
//!
//! fn legacy_total(items: &[u32]) -> u32 {
//!     items.iter().sum()
//! }
//!
//! fn fast_total(items: &[u32]) -> u32 {
//!     items.iter().copied().fold(0, u32::wrapping_add)
//! }
//!
//! let mut experiment: Experiment<u32> =
//!     Experiment::with_publisher("cart-total", DefaultPublisher::new(true));
//! experiment.use_control(|| Ok(legacy_total(&[1, 2, 3])))?;
//! experiment.candidate(|| Ok(fast_total(&[1, 2, 3])))?;
//!
//! let total = experiment.run().map_err(|e| e.to_string())?;
//! assert_eq!(total, 6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod experiment;
pub mod mismatch;
pub mod observation;
pub mod publisher;
pub mod result;

pub use config::{ExperimentConfig, RescuePolicy, ScienceOptions};
pub use error::{Error, HookError, Result, RunError};
pub use experiment::{Context, Experiment, Operation};
pub use mismatch::MismatchError;
pub use observation::{CleanedValue, Failure, Observation, Timing};
pub use publisher::{DefaultPublisher, Publisher};
pub use result::{ExperimentResult, Report};

use std::fmt::{Debug, Display};

/// Build an experiment named `name` around `publisher`, let `configure`
/// register its behaviors, and run it.
///
/// # Errors
///
/// Returns registration errors from `configure` as `RunError::Experiment`,
/// otherwise whatever [`Experiment::run`] returns.
///
/// # Example
///
/// ```rust
/// use trueno_science::{science, DefaultPublisher};
///
/// let value = science("greeting", DefaultPublisher::new(true), |e| {
///     e.use_control(|| Ok::<_, anyhow::Error>("hello"))?;
///     e.candidate(|| Ok("hello"))
/// });
///
/// assert_eq!(value.map_err(|e| e.to_string())?, "hello");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn science<T, E, P, F>(
    name: impl Into<String>,
    publisher: P,
    configure: F,
) -> std::result::Result<T, RunError<E>>
where
    T: PartialEq + Debug + Send + Sync + 'static,
    E: Display + Debug + Send + Sync + 'static,
    P: Publisher<T, E>,
    F: FnOnce(&mut Experiment<T, E, P>) -> Result<()>,
{
    science_with(name, publisher, ScienceOptions::default(), configure)
}

/// [`science`] with per-call options: which behavior's outcome to return
/// and the context the experiment starts with. `configure` runs after the
/// context is seeded, so it can add to or overwrite it.
///
/// # Errors
///
/// Returns registration errors from `configure` as `RunError::Experiment`,
/// otherwise whatever [`Experiment::run_named`] returns.
///
/// # Example
///
/// ```rust
/// use trueno_science::{science_with, DefaultPublisher, ScienceOptions};
///
/// let options = ScienceOptions::builder().run("candidate").build();
/// let value = science_with("greeting", DefaultPublisher::new(true), options, |e| {
///     e.use_control(|| Ok::<_, anyhow::Error>("hello"))?;
///     e.candidate(|| Ok("hi"))
/// });
///
/// assert_eq!(value.map_err(|e| e.to_string())?, "hi");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn science_with<T, E, P, F>(
    name: impl Into<String>,
    publisher: P,
    options: ScienceOptions,
    configure: F,
) -> std::result::Result<T, RunError<E>>
where
    T: PartialEq + Debug + Send + Sync + 'static,
    E: Display + Debug + Send + Sync + 'static,
    P: Publisher<T, E>,
    F: FnOnce(&mut Experiment<T, E, P>) -> Result<()>,
{
    let mut experiment = Experiment::with_publisher(name, publisher);
    experiment.merge_context(options.context().clone())?;
    configure(&mut experiment)?;
    experiment.run_named(options.control())
}
