//! Publisher - the capability contract every experiment needs
//!
//! An experiment asks its publisher whether candidates may run at all and
//! hands it each finished [`ExperimentResult`]. Failures of internal steps are
//! reported through [`Publisher::raised`], which re-raises by default; a
//! production publisher normally overrides it to log and continue.

use crate::error::HookError;
use crate::experiment::Operation;
use crate::result::ExperimentResult;

/// Telemetry sink and enablement policy for experiments.
pub trait Publisher<T, E> {
    /// May this experiment run its candidates?
    ///
    /// # Errors
    ///
    /// Any error is routed through `raised(Operation::Enabled, ..)` and the
    /// run falls back to the control only.
    fn enabled(&self) -> anyhow::Result<bool>;

    /// Deliver a finished result.
    ///
    /// # Errors
    ///
    /// Any error is routed through `raised(Operation::Publish, ..)`.
    fn publish(&self, result: &ExperimentResult<T, E>) -> anyhow::Result<()>;

    /// Called when an internal step fails.
    ///
    /// Returning `Ok(())` swallows the failure; returning `Err` aborts the
    /// run with `Error::Hook`. The default re-raises.
    ///
    /// # Errors
    ///
    /// Returns the failure when it should propagate.
    fn raised(&self, operation: Operation, error: HookError) -> Result<(), HookError> {
        let _ = operation;
        Err(error)
    }
}

/// Publisher used when no telemetry sink is wired.
///
/// `enabled` returns a fixed policy (disabled unless built with
/// `DefaultPublisher::new(true)`) and `publish` does nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultPublisher {
    enabled: bool,
}

impl DefaultPublisher {
    /// A publisher with a fixed enablement policy.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// A publisher that never lets candidates run.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(false)
    }

    /// The fixed policy.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl<T, E> Publisher<T, E> for DefaultPublisher {
    fn enabled(&self) -> anyhow::Result<bool> {
        Ok(self.enabled)
    }

    fn publish(&self, _result: &ExperimentResult<T, E>) -> anyhow::Result<()> {
        Ok(())
    }
}
