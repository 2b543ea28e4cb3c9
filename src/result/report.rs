//! Report - the serializable shape of a result handed to telemetry sinks

use std::fmt::{Debug, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExperimentResult;
use crate::experiment::Context;
use crate::observation::Observation;

/// One observation as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationReport {
    /// Behavior name
    pub name: String,
    /// `Debug` rendering of the cleaned value; absent if the behavior failed
    pub value: Option<String>,
    /// Rendered failure; absent if the behavior produced a value
    pub failure: Option<String>,
    /// Wall-clock seconds
    pub duration: f64,
    /// CPU seconds, when known
    pub cpu_time: Option<f64>,
}

impl ObservationReport {
    fn from_observation<T: Debug, E: Display>(observation: &Observation<T, E>) -> Self {
        Self {
            name: observation.name().to_string(),
            value: observation.cleaned_value().map(|value| format!("{value:?}")),
            failure: observation.failure().map(ToString::to_string),
            duration: observation.duration(),
            cpu_time: observation.cpu_time(),
        }
    }
}

/// A result as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Experiment name
    pub experiment: String,
    /// Experiment context
    pub context: Context,
    /// Cohort, if a cohort rule is configured
    pub cohort: Option<String>,
    /// When the result was assembled
    pub completed_at: DateTime<Utc>,
    /// Whether every candidate matched
    pub matched: bool,
    /// The control observation
    pub control: ObservationReport,
    /// Candidate observations in execution order
    pub candidates: Vec<ObservationReport>,
    /// Names of mismatched candidates
    pub mismatched: Vec<String>,
    /// Names of ignored candidates
    pub ignored: Vec<String>,
}

impl Report {
    pub(super) fn from_result<T: Debug, E: Display>(result: &ExperimentResult<T, E>) -> Self {
        let names = |observations: Vec<&Observation<T, E>>| -> Vec<String> {
            observations
                .into_iter()
                .map(|o| o.name().to_string())
                .collect()
        };

        Self {
            experiment: result.experiment_name().to_string(),
            context: result.context().clone(),
            cohort: result.cohort().map(str::to_string),
            completed_at: result.completed_at(),
            matched: result.is_matched(),
            control: ObservationReport::from_observation(result.control()),
            candidates: result
                .candidates()
                .into_iter()
                .map(ObservationReport::from_observation)
                .collect(),
            mismatched: names(result.mismatched()),
            ignored: names(result.ignored()),
        }
    }

    /// Serialize to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; plain reports always serialize.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
