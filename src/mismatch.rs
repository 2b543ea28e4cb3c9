//! Mismatch failure raised by fail-fast experiments

use std::fmt::{self, Debug, Display, Write as _};

use crate::observation::{Failure, Observation};
use crate::result::ExperimentResult;

/// A run produced an unsuppressed mismatch while mismatch raising was on.
///
/// Carries the whole result; its `Display` lists the control and every
/// mismatched candidate with their cleaned values or failures. A panic is
/// followed by its location and, when captured, the panicking behavior's
/// backtrace:
///
/// ```text
/// experiment 'widget-permissions' observations mismatched:
/// control:
///   "fine"
/// candidate:
///   "not fine"
/// ```
#[derive(Debug)]
pub struct MismatchError<T, E> {
    name: String,
    result: ExperimentResult<T, E>,
}

impl<T, E> MismatchError<T, E> {
    /// Wrap a mismatched result.
    #[must_use]
    pub fn new(result: ExperimentResult<T, E>) -> Self {
        Self {
            name: result.experiment_name().to_string(),
            result,
        }
    }

    /// Name of the experiment that mismatched.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The published result.
    #[must_use]
    pub const fn result(&self) -> &ExperimentResult<T, E> {
        &self.result
    }

    /// Take the result back.
    #[must_use]
    pub fn into_result(self) -> ExperimentResult<T, E> {
        self.result
    }
}

fn format_observation<T: Debug, E: Display>(
    out: &mut String,
    observation: &Observation<T, E>,
) -> fmt::Result {
    writeln!(out, "{}:", observation.name())?;
    match observation.failure() {
        Some(failure) => {
            writeln!(out, "  {failure}")?;
            if let Failure::Panic(panic) = failure {
                if let Some(location) = panic.location() {
                    writeln!(out, "    at {location}")?;
                }
                for line in panic.backtrace().into_iter().flat_map(str::lines) {
                    writeln!(out, "    {}", line.trim())?;
                }
            }
        }
        None => {
            if let Some(value) = observation.cleaned_value() {
                writeln!(out, "  {value:?}")?;
            }
        }
    }
    Ok(())
}

impl<T: Debug, E: Display> Display for MismatchError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = format!("experiment '{}' observations mismatched:\n", self.name);
        format_observation(&mut out, self.result.control())?;
        for candidate in self.result.mismatched() {
            format_observation(&mut out, candidate)?;
        }
        f.write_str(&out)
    }
}

impl<T: Debug, E: Display + Debug> std::error::Error for MismatchError<T, E> {}
