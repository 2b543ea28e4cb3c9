//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::fmt::{Debug, Display};
use std::sync::Mutex;

use trueno_science::{ExperimentResult, HookError, Operation, Publisher, Report};

/// Error type returned by test behaviors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Ordinary failure
    #[error("{0}")]
    Runtime(String),
    /// Same message as `Runtime`, different kind
    #[error("{0}")]
    Other(String),
}

/// Shorthand for `AppError::Runtime`.
pub fn boom(message: &str) -> AppError {
    AppError::Runtime(message.to_string())
}

/// Publisher that records everything it is handed.
#[derive(Debug)]
pub struct Recorder {
    enabled: bool,
    fail_enabled: bool,
    fail_publish: bool,
    reraise: bool,
    reports: Mutex<Vec<Report>>,
    exceptions: Mutex<Vec<(Operation, String)>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_enabled: false,
            fail_publish: false,
            reraise: false,
            reports: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
        }
    }
}

impl Recorder {
    /// Enabled, swallowing hook failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled, re-raising hook failures like the default publisher.
    pub fn reraising() -> Self {
        Self {
            reraise: true,
            ..Self::default()
        }
    }

    /// Never lets candidates run.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// `enabled` returns an error.
    pub fn failing_enabled() -> Self {
        Self {
            fail_enabled: true,
            ..Self::default()
        }
    }

    /// `publish` records, then returns an error.
    pub fn failing_publish(reraise: bool) -> Self {
        Self {
            fail_publish: true,
            reraise,
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn last_report(&self) -> Option<Report> {
        self.reports.lock().unwrap().last().cloned()
    }

    pub fn publish_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn exceptions(&self) -> Vec<(Operation, String)> {
        self.exceptions.lock().unwrap().clone()
    }

    pub fn last_exception(&self) -> Option<(Operation, String)> {
        self.exceptions.lock().unwrap().last().cloned()
    }
}

impl<T: Debug, E: Display> Publisher<T, E> for Recorder {
    fn enabled(&self) -> anyhow::Result<bool> {
        if self.fail_enabled {
            anyhow::bail!("kaboom");
        }
        Ok(self.enabled)
    }

    fn publish(&self, result: &ExperimentResult<T, E>) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(result.report());
        if self.fail_publish {
            anyhow::bail!("boomtown");
        }
        Ok(())
    }

    fn raised(&self, operation: Operation, error: HookError) -> Result<(), HookError> {
        self.exceptions
            .lock()
            .unwrap()
            .push((operation, error.to_string()));
        if self.reraise {
            Err(error)
        } else {
            Ok(())
        }
    }
}
