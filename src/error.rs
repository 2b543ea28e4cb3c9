//! Error types for Trueno-Science
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

use crate::experiment::Operation;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Science error types
#[derive(Error, Debug)]
pub enum Error {
    /// The behavior selected as control was never registered
    #[error("{experiment} missing {behavior} behavior")]
    BehaviorMissing {
        /// Experiment name
        experiment: String,
        /// Requested behavior name
        behavior: String,
    },

    /// A behavior name was registered twice
    #[error("{experiment} already has {behavior} behavior")]
    BehaviorNotUnique {
        /// Experiment name
        experiment: String,
        /// Duplicated behavior name
        behavior: String,
    },

    /// Reading the value of an observation that failed
    #[error("{observation} doesn't have a value, it failed: {failure}")]
    NoValue {
        /// Observation (behavior) name
        observation: String,
        /// Rendered failure the observation captured instead of a value
        failure: String,
    },

    /// Behaviors or context changed after the experiment started running
    #[error("{experiment} is frozen: behaviors and context can't change once it has run")]
    Frozen {
        /// Experiment name
        experiment: String,
    },

    /// An internal hook failed and `Publisher::raised` re-raised it
    #[error("{operation} failed: {source}")]
    Hook {
        /// Hook that failed
        operation: Operation,
        /// Underlying failure
        #[source]
        source: HookError,
    },
}

/// Failure of an internal (non-behavior) step, as handed to `Publisher::raised`.
#[derive(Error, Debug)]
pub enum HookError {
    /// A fallible hook (`enabled`, `publish`) returned an error
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// A closure hook panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Failure returned by `Experiment::run`.
///
/// `Control` is the only variant produced by user code: it is the control
/// behavior's own error, passed through untouched. `Mismatch` is the fail-fast
/// signal and is deliberately a separate variant, so code that handles the
/// control's errors does not swallow it.
#[derive(Error, Debug)]
pub enum RunError<E> {
    /// The control behavior failed; this is its error verbatim
    #[error(transparent)]
    Control(E),

    /// Mismatch raising is enabled and the run mismatched
    #[error(transparent)]
    Mismatch(anyhow::Error),

    /// Registration or internal hook failure
    #[error(transparent)]
    Experiment(#[from] Error),
}

impl<E> RunError<E> {
    /// The control's error, if that is what this is.
    pub fn into_control(self) -> Option<E> {
        match self {
            Self::Control(error) => Some(error),
            _ => None,
        }
    }

    /// Whether this is the fail-fast mismatch signal.
    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }
}
