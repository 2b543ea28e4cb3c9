//! Experiment Result - the immutable, partitioned outcome of one run
//!
//! ## Partitioning
//!
//! ```text
//! observations ──┬── control
//!                └── candidates ──┬── equivalent to control
//!                                 └── not equivalent ──┬── ignored    (an ignore rule matched)
//!                                                      └── mismatched (reported)
//! ```
//!
//! The partition is computed once at construction. All fields are private
//! and only exposed by shared reference, so a result can't change after it
//! is built.

mod report;

pub use report::{ObservationReport, Report};

use std::fmt::{Debug, Display};

use chrono::{DateTime, Utc};

use crate::experiment::{Context, Experiment};
use crate::observation::{Failure, Observation};
use crate::publisher::Publisher;
use crate::{Error, Result};

/// The outcome of one experiment run.
#[derive(Debug)]
pub struct ExperimentResult<T, E> {
    experiment: String,
    context: Context,
    observations: Vec<Observation<T, E>>,
    control: usize,
    mismatched: Vec<usize>,
    ignored: Vec<usize>,
    cohort: Option<String>,
    completed_at: DateTime<Utc>,
}

impl<T, E> ExperimentResult<T, E>
where
    T: PartialEq + Debug + Send + Sync + 'static,
    E: Display + Debug + Send + Sync + 'static,
{
    /// Evaluate `observations` against the one named `control`.
    ///
    /// Every candidate is compared with the experiment's comparators; each
    /// one that is not equivalent is checked against the ignore rules and
    /// lands in either `ignored` or `mismatched`.
    ///
    /// # Errors
    ///
    /// Returns `Error::BehaviorMissing` if no observation is named `control`,
    /// or `Error::Hook` if a comparator, ignore rule or cohort rule failed and
    /// the publisher re-raised it.
    pub fn new<P: Publisher<T, E>>(
        experiment: &Experiment<T, E, P>,
        observations: Vec<Observation<T, E>>,
        control: &str,
    ) -> Result<Self> {
        let control_index = observations
            .iter()
            .position(|observation| observation.name() == control)
            .ok_or_else(|| Error::BehaviorMissing {
                experiment: experiment.name().to_string(),
                behavior: control.to_string(),
            })?;

        let mut mismatched = Vec::new();
        let mut ignored = Vec::new();
        let primary = &observations[control_index];

        for (index, candidate) in observations.iter().enumerate() {
            if candidate.name() == control {
                continue;
            }
            if experiment.observations_are_equivalent(primary, candidate)? {
                continue;
            }
            if experiment.ignore_mismatched_observation(primary, candidate)? {
                ignored.push(index);
            } else {
                mismatched.push(index);
            }
        }

        let mut result = Self {
            experiment: experiment.name().to_string(),
            context: experiment.context().clone(),
            observations,
            control: control_index,
            mismatched,
            ignored,
            cohort: None,
            completed_at: Utc::now(),
        };
        result.cohort = experiment.determine_cohort_for(&result)?;

        Ok(result)
    }
}

impl<T, E> ExperimentResult<T, E> {
    /// Name of the experiment that produced this result.
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment
    }

    /// Context copied from the experiment at run time.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// All observations, in execution order.
    #[must_use]
    pub fn observations(&self) -> &[Observation<T, E>] {
        &self.observations
    }

    /// Look up an observation by behavior name.
    #[must_use]
    pub fn observation(&self, name: &str) -> Option<&Observation<T, E>> {
        self.observations.iter().find(|o| o.name() == name)
    }

    /// The control observation.
    #[must_use]
    pub fn control(&self) -> &Observation<T, E> {
        &self.observations[self.control]
    }

    /// Every observation except the control, in execution order.
    #[must_use]
    pub fn candidates(&self) -> Vec<&Observation<T, E>> {
        let control = self.control().name();
        self.observations
            .iter()
            .filter(|o| o.name() != control)
            .collect()
    }

    /// Candidates that didn't match the control and weren't ignored.
    #[must_use]
    pub fn mismatched(&self) -> Vec<&Observation<T, E>> {
        self.mismatched
            .iter()
            .map(|&i| &self.observations[i])
            .collect()
    }

    /// Candidates that didn't match the control but an ignore rule suppressed.
    #[must_use]
    pub fn ignored(&self) -> Vec<&Observation<T, E>> {
        self.ignored.iter().map(|&i| &self.observations[i]).collect()
    }

    /// Every candidate matched; an ignored mismatch is not a match.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.mismatched.is_empty() && self.ignored.is_empty()
    }

    /// At least one candidate mismatched.
    #[must_use]
    pub fn is_mismatched(&self) -> bool {
        !self.mismatched.is_empty()
    }

    /// At least one mismatch was ignored.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        !self.ignored.is_empty()
    }

    /// Cohort assigned by the experiment's cohort rule, if any.
    #[must_use]
    pub fn cohort(&self) -> Option<&str> {
        self.cohort.as_deref()
    }

    /// When the result was assembled.
    #[must_use]
    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Take the control's value or failure, dropping the rest.
    pub(crate) fn into_control(mut self) -> std::result::Result<T, Failure<E>> {
        self.observations.swap_remove(self.control).into_outcome()
    }
}

impl<T: Debug, E: Display> ExperimentResult<T, E> {
    /// Serializable snapshot for telemetry sinks.
    #[must_use]
    pub fn report(&self) -> Report {
        Report::from_result(self)
    }
}
