//! Experiment configuration
//!
//! Settings that would otherwise be process-wide defaults are carried in an
//! explicit [`ExperimentConfig`] handed to `Experiment::with_config`.

use serde::{Deserialize, Serialize};

use crate::experiment::{Context, CONTROL};

/// Which failures an observation captures instead of letting them escape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescuePolicy {
    /// Capture returned errors and panics.
    #[default]
    Everything,
    /// Capture returned errors only; panics unwind through `run`.
    ErrorsOnly,
}

impl RescuePolicy {
    /// Whether panics are caught and recorded.
    #[must_use]
    pub const fn catches_panics(self) -> bool {
        matches!(self, Self::Everything)
    }
}

/// Configuration shared by every experiment built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    raise_on_mismatches: bool,
    rescue: RescuePolicy,
}

impl ExperimentConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ExperimentConfigBuilder {
        ExperimentConfigBuilder::default()
    }

    /// Whether a mismatched run fails with `RunError::Mismatch` after publishing.
    #[must_use]
    pub const fn raise_on_mismatches(&self) -> bool {
        self.raise_on_mismatches
    }

    /// Failure capture policy for behaviors and hooks.
    #[must_use]
    pub const fn rescue(&self) -> RescuePolicy {
        self.rescue
    }
}

/// Builder for `ExperimentConfig`.
#[derive(Debug, Default)]
pub struct ExperimentConfigBuilder {
    config: ExperimentConfig,
}

impl ExperimentConfigBuilder {
    /// Fail fast on mismatches (intended for test environments).
    #[must_use]
    pub const fn raise_on_mismatches(mut self, raise: bool) -> Self {
        self.config.raise_on_mismatches = raise;
        self
    }

    /// Set the failure capture policy.
    #[must_use]
    pub const fn rescue(mut self, rescue: RescuePolicy) -> Self {
        self.config.rescue = rescue;
        self
    }

    /// Build the `ExperimentConfig`.
    #[must_use]
    pub const fn build(self) -> ExperimentConfig {
        self.config
    }
}

/// Per-call options for `science_with`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScienceOptions {
    run: Option<String>,
    context: Context,
}

impl ScienceOptions {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ScienceOptionsBuilder {
        ScienceOptionsBuilder::default()
    }

    /// Behavior whose outcome is returned, `"control"` unless overridden.
    #[must_use]
    pub fn control(&self) -> &str {
        self.run.as_deref().unwrap_or(CONTROL)
    }

    /// Context the experiment starts with, before `configure` runs.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }
}

/// Builder for `ScienceOptions`.
#[derive(Debug, Default)]
pub struct ScienceOptionsBuilder {
    options: ScienceOptions,
}

impl ScienceOptionsBuilder {
    /// Return this behavior's outcome instead of the control's.
    #[must_use]
    pub fn run(mut self, behavior: impl Into<String>) -> Self {
        self.options.run = Some(behavior.into());
        self
    }

    /// Seed the experiment's context.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.options.context = context;
        self
    }

    /// Build the `ScienceOptions`.
    #[must_use]
    pub fn build(self) -> ScienceOptions {
        self.options
    }
}
