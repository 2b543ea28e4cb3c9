//! Hook types and failure routing for internal (non-behavior) steps

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::config::RescuePolicy;
use crate::error::HookError;
use crate::mismatch::MismatchError;
use crate::observation::panic_message;
use crate::result::ExperimentResult;

/// Value equivalence: `(control, candidate) -> equivalent`.
pub type Comparator<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Failure equivalence for returned errors.
pub type ErrorComparator<E> = Box<dyn Fn(&E, &E) -> bool + Send + Sync>;

/// Projects a value into the form shown in reports and mismatch messages.
pub type Cleaner<T> = Box<dyn Fn(&T) -> serde_json::Value + Send + Sync>;

/// `(control value, candidate value) -> ignore this mismatch`. A side that
/// failed is passed as `None`.
pub type IgnoreRule<T> = Box<dyn Fn(Option<&T>, Option<&T>) -> bool + Send + Sync>;

/// Gate deciding whether candidates run at all.
pub type RunIf = Box<dyn Fn() -> bool + Send + Sync>;

/// Setup run once before behaviors, only when experimenting.
pub type BeforeRun = Box<dyn Fn() + Send + Sync>;

/// Assigns a result to a cohort.
pub type CohortRule<T, E> = Box<dyn Fn(&ExperimentResult<T, E>) -> String + Send + Sync>;

/// Builds the failure raised for a mismatched run.
pub type MismatchMapper<T, E> = Box<dyn Fn(MismatchError<T, E>) -> anyhow::Error + Send + Sync>;

/// Internal step whose failure is handed to `Publisher::raised`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `Publisher::enabled`
    Enabled,
    /// The `run_if` gate
    RunIf,
    /// Value or error comparator
    Compare,
    /// An ignore rule
    Ignore,
    /// The cleaner
    Clean,
    /// The cohort rule
    Cohort,
    /// `Publisher::publish`
    Publish,
}

impl Operation {
    /// Snake-case name, as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::RunIf => "run_if",
            Self::Compare => "compare",
            Self::Ignore => "ignore",
            Self::Clean => "clean",
            Self::Cohort => "cohort",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run a hook, turning a returned error or (when the policy allows) a panic
/// into a `HookError`.
pub(crate) fn guarded<R>(
    rescue: RescuePolicy,
    hook: impl FnOnce() -> anyhow::Result<R>,
) -> Result<R, HookError> {
    if !rescue.catches_panics() {
        return hook().map_err(HookError::Failed);
    }

    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result.map_err(HookError::Failed),
        Err(payload) => Err(HookError::Panicked(panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Enabled.to_string(), "enabled");
        assert_eq!(Operation::RunIf.to_string(), "run_if");
        assert_eq!(Operation::Publish.as_str(), "publish");
        assert_eq!(
            serde_json::to_string(&Operation::Compare).unwrap(),
            "\"compare\""
        );
    }

    #[test]
    fn test_guarded_passes_value_through() {
        let value = guarded(RescuePolicy::Everything, || Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_guarded_wraps_returned_error() {
        let err = guarded::<()>(RescuePolicy::Everything, || Err(anyhow::anyhow!("boomtown")))
            .unwrap_err();
        assert!(matches!(err, HookError::Failed(_)));
        assert_eq!(err.to_string(), "boomtown");
    }

    #[test]
    fn test_guarded_catches_panic() {
        let err = guarded::<()>(RescuePolicy::Everything, || panic!("kaboom")).unwrap_err();
        assert!(matches!(err, HookError::Panicked(ref message) if message == "kaboom"));
    }

    #[test]
    fn test_guarded_errors_only_propagates_panic() {
        let caught = panic::catch_unwind(|| {
            let _ = guarded::<()>(RescuePolicy::ErrorsOnly, || panic!("fatal"));
        });
        assert!(caught.is_err());
    }
}
