//! Observation - the recorded outcome of running one behavior once
//!
//! An observation either holds the value a behavior returned or the failure
//! it produced (a returned error or a caught panic), never both. Timing is
//! wall-clock seconds unless a fabricated timing was supplied for tests.
//!
//! Panic sites are recorded by a panic hook installed on first use. It
//! chains to whatever hook was installed before it, so normal panic output
//! is unchanged.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::config::RescuePolicy;
use crate::{Error, Result};

/// A named behavior's computation.
pub type Behavior<T, E> = Box<dyn Fn() -> std::result::Result<T, E> + Send + Sync>;

/// Render a panic payload the way `std` prints it.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Flag to track if the panic-site hook is installed
static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// Nesting depth of behaviors being observed on this thread
    static OBSERVING: Cell<usize> = const { Cell::new(0) };
    /// Site of the last panic raised by an observed behavior on this thread
    static PANIC_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Where a panic was raised, taken inside the panic hook so the stack is the
/// panicking behavior's rather than the observer's.
#[derive(Debug, Default)]
struct PanicSite {
    location: Option<String>,
    backtrace: Option<String>,
}

/// Install the panic-site hook. Subsequent calls are no-ops.
fn install_panic_hook() {
    if PANIC_HOOK_INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            if OBSERVING.try_with(Cell::get).unwrap_or(0) > 0 {
                let backtrace = Backtrace::capture();
                let site = PanicSite {
                    location: info
                        .location()
                        .map(|location| format!("{}:{}", location.file(), location.line())),
                    backtrace: (backtrace.status() == BacktraceStatus::Captured)
                        .then(|| backtrace.to_string()),
                };
                let _ = PANIC_SITE.try_with(|slot| *slot.borrow_mut() = Some(site));
            }

            previous(info);
        }));
    }
}

/// Run `behavior`, catching a panic along with the site it was raised at.
fn catch_behavior<R>(behavior: impl FnOnce() -> R) -> std::result::Result<R, PanicFailure> {
    install_panic_hook();

    OBSERVING.with(|depth| depth.set(depth.get() + 1));
    let caught = panic::catch_unwind(AssertUnwindSafe(behavior));
    OBSERVING.with(|depth| depth.set(depth.get() - 1));

    // Always drained, so a panic the behavior caught itself never leaks
    // into a later observation.
    let site = PANIC_SITE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_default();
    caught.map_err(|payload| PanicFailure::new(payload, site))
}

/// A panic caught while a behavior ran.
///
/// The original payload is kept so a panicking control can be resumed with
/// exactly what it panicked with.
pub struct PanicFailure {
    message: String,
    location: Option<String>,
    backtrace: Option<String>,
    payload: Mutex<Option<Box<dyn Any + Send>>>,
}

impl PanicFailure {
    fn new(payload: Box<dyn Any + Send>, site: PanicSite) -> Self {
        Self {
            message: panic_message(payload.as_ref()),
            location: site.location,
            backtrace: site.backtrace,
            payload: Mutex::new(Some(payload)),
        }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `file:line` of the `panic!` inside the behavior.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Stack of the panicking behavior, captured at the panic site when
    /// `RUST_BACKTRACE` enables it.
    #[must_use]
    pub fn backtrace(&self) -> Option<&str> {
        self.backtrace.as_deref()
    }

    /// Continue unwinding with the original payload.
    pub(crate) fn resume(self) -> ! {
        let Self {
            message, payload, ..
        } = self;
        let payload = payload
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| Box::new(message) as Box<dyn Any + Send>);
        panic::resume_unwind(payload)
    }
}

impl fmt::Debug for PanicFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicFailure")
            .field("message", &self.message)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Why an observation has no value.
#[derive(Debug)]
pub enum Failure<E> {
    /// The behavior returned `Err`.
    Error(E),
    /// The behavior panicked.
    Panic(PanicFailure),
}

impl<E> Failure<E> {
    /// Whether this failure is a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }

    /// The returned error, if this is not a panic.
    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            Self::Panic(_) => None,
        }
    }
}

/// Name of the type (or enum variant) an error's `Debug` rendering starts
/// with; for `anyhow::Error`, that of its root cause.
///
/// Errors rendered without a leading name, such as plain strings or ad hoc
/// `anyhow!` messages, all share the empty kind and so compare by message
/// alone. `Experiment::compare_errors` replaces the whole rule.
fn error_kind<E: fmt::Debug + 'static>(error: &E) -> String {
    let rendered = match (error as &dyn Any).downcast_ref::<anyhow::Error>() {
        Some(error) => format!("{:?}", error.root_cause()),
        None => format!("{error:?}"),
    };

    if !rendered.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        return String::new();
    }
    rendered
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | ':'))
        .collect()
}

impl<E: fmt::Display + fmt::Debug + 'static> Failure<E> {
    /// Same kind and same message.
    fn same_as(&self, other: &Self, error_comparator: Option<&dyn Fn(&E, &E) -> bool>) -> bool {
        match (self, other) {
            (Self::Error(a), Self::Error(b)) => match error_comparator {
                Some(compare) => compare(a, b),
                None => error_kind(a) == error_kind(b) && a.to_string() == b.to_string(),
            },
            (Self::Panic(a), Self::Panic(b)) => a.message == b.message,
            _ => false,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "error: {error}"),
            Self::Panic(panic) => write!(f, "panicked: {}", panic.message),
        }
    }
}

/// Timing supplied in place of measuring, for deterministic tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    duration: f64,
    cpu_time: Option<f64>,
}

impl Timing {
    /// Wall-clock duration in seconds.
    #[must_use]
    pub const fn new(duration: f64) -> Self {
        Self {
            duration,
            cpu_time: None,
        }
    }

    /// Also report a CPU time in seconds.
    #[must_use]
    pub const fn with_cpu_time(mut self, cpu_time: f64) -> Self {
        self.cpu_time = Some(cpu_time);
        self
    }
}

impl From<f64> for Timing {
    fn from(duration: f64) -> Self {
        Self::new(duration)
    }
}

/// A value as shown in reports and mismatch messages.
///
/// Its `Debug` rendering is the raw value's `Debug`, or the cleaner's output
/// as compact JSON.
#[derive(PartialEq)]
pub enum CleanedValue<'a, T> {
    /// No cleaner is configured, or it failed
    Raw(&'a T),
    /// What the cleaner projected the value to
    Cleaned(&'a serde_json::Value),
}

impl<T: fmt::Debug> fmt::Debug for CleanedValue<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(value) => fmt::Debug::fmt(value, f),
            Self::Cleaned(value) => fmt::Display::fmt(value, f),
        }
    }
}

/// The immutable outcome of executing one behavior exactly once.
#[derive(Debug)]
pub struct Observation<T, E> {
    name: String,
    experiment: String,
    outcome: std::result::Result<T, Failure<E>>,
    cleaned: Option<serde_json::Value>,
    duration: f64,
    cpu_time: Option<f64>,
}

impl<T, E> Observation<T, E> {
    /// Run `behavior` now and record what happened, catching errors and panics.
    pub fn new<F>(name: impl Into<String>, behavior: F) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        ObservationBuilder::new(name).observe(behavior)
    }

    /// Name of the behavior this observes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the experiment the behavior belongs to.
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// The value the behavior returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoValue` if the behavior failed.
    pub fn value(&self) -> Result<&T>
    where
        E: fmt::Display,
    {
        self.outcome.as_ref().map_err(|failure| Error::NoValue {
            observation: self.name.clone(),
            failure: failure.to_string(),
        })
    }

    /// The value, or `None` if the behavior failed.
    #[must_use]
    pub fn try_value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// The failure, or `None` if the behavior produced a value.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure<E>> {
        self.outcome.as_ref().err()
    }

    /// Whether the behavior failed.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.outcome.is_err()
    }

    /// Value or failure.
    #[must_use]
    pub const fn outcome(&self) -> &std::result::Result<T, Failure<E>> {
        &self.outcome
    }

    /// Elapsed wall-clock seconds (or the fabricated duration).
    #[must_use]
    pub const fn duration(&self) -> f64 {
        self.duration
    }

    /// CPU seconds, when supplied.
    #[must_use]
    pub const fn cpu_time(&self) -> Option<f64> {
        self.cpu_time
    }

    /// The value as the experiment's cleaner rendered it.
    ///
    /// Falls back to the raw value when no cleaner is configured or the
    /// cleaner failed. `None` only when the behavior failed.
    #[must_use]
    pub fn cleaned_value(&self) -> Option<CleanedValue<'_, T>> {
        match &self.cleaned {
            Some(cleaned) => Some(CleanedValue::Cleaned(cleaned)),
            None => self.try_value().map(CleanedValue::Raw),
        }
    }

    pub(crate) fn with_cleaned(mut self, cleaned: serde_json::Value) -> Self {
        if self.outcome.is_ok() {
            self.cleaned = Some(cleaned);
        }
        self
    }

    pub(crate) fn into_outcome(self) -> std::result::Result<T, Failure<E>> {
        self.outcome
    }
}

impl<T: PartialEq, E: fmt::Display + fmt::Debug + 'static> Observation<T, E> {
    /// Equivalence with the default rules: `==` on values, kind and message
    /// on failures.
    #[must_use]
    pub fn equivalent_to(&self, other: &Self) -> bool {
        self.equivalent_with(other, None, None)
    }

    /// Equivalence with optional custom value and error comparators.
    ///
    /// A failed observation is never equivalent to one holding a value.
    #[must_use]
    pub fn equivalent_with(
        &self,
        other: &Self,
        comparator: Option<&dyn Fn(&T, &T) -> bool>,
        error_comparator: Option<&dyn Fn(&E, &E) -> bool>,
    ) -> bool {
        match (&self.outcome, &other.outcome) {
            (Ok(a), Ok(b)) => comparator.map_or_else(|| a == b, |compare| compare(a, b)),
            (Err(a), Err(b)) => a.same_as(b, error_comparator),
            _ => false,
        }
    }
}

/// Builder for observations needing an experiment name, fabricated timing
/// or a different rescue policy.
#[derive(Debug)]
pub struct ObservationBuilder {
    name: String,
    experiment: String,
    fabricated: Option<Timing>,
    rescue: RescuePolicy,
}

impl ObservationBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            experiment: "experiment".to_string(),
            fabricated: None,
            rescue: RescuePolicy::default(),
        }
    }

    /// Set the owning experiment's name.
    #[must_use]
    pub fn experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = experiment.into();
        self
    }

    /// Use this timing instead of measuring.
    #[must_use]
    pub const fn fabricated(mut self, timing: Option<Timing>) -> Self {
        self.fabricated = timing;
        self
    }

    /// Set which failures are captured.
    #[must_use]
    pub const fn rescue(mut self, rescue: RescuePolicy) -> Self {
        self.rescue = rescue;
        self
    }

    /// Run the behavior and record the observation.
    ///
    /// Under `RescuePolicy::ErrorsOnly` a panic is not caught and unwinds
    /// out of this call.
    pub fn observe<T, E, F>(self, behavior: F) -> Observation<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let start = Instant::now();
        let outcome = if self.rescue.catches_panics() {
            match catch_behavior(behavior) {
                Ok(result) => result.map_err(Failure::Error),
                Err(panic) => Err(Failure::Panic(panic)),
            }
        } else {
            behavior().map_err(Failure::Error)
        };
        let elapsed = start.elapsed().as_secs_f64();

        let (duration, cpu_time) = self
            .fabricated
            .map_or((elapsed, None), |timing| (timing.duration, timing.cpu_time));

        Observation {
            name: self.name,
            experiment: self.experiment,
            outcome,
            cleaned: None,
            duration,
            cpu_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_records_value() {
        let ob: Observation<&str, String> = Observation::new("test", || Ok("ret"));

        assert_eq!(ob.name(), "test");
        assert_eq!(*ob.value().unwrap(), "ret");
        assert!(!ob.failed());
        assert!(ob.failure().is_none());
        assert!(ob.duration() >= 0.0);
        assert!(ob.cpu_time().is_none());
    }

    #[test]
    fn test_observation_records_error() {
        let ob: Observation<i32, String> = Observation::new("test", || Err("exception".into()));

        assert!(ob.failed());
        assert!(ob.try_value().is_none());
        assert_eq!(ob.failure().unwrap().error().unwrap(), "exception");

        let err = ob.value().unwrap_err();
        assert!(matches!(err, Error::NoValue { ref observation, .. } if observation == "test"));
    }

    #[test]
    fn test_observation_catches_panic() {
        let ob: Observation<i32, String> = Observation::new("test", || panic!("kaboom"));

        let failure = ob.failure().unwrap();
        assert!(failure.is_panic());
        assert_eq!(failure.to_string(), "panicked: kaboom");
    }

    #[test]
    fn test_errors_only_lets_panics_escape() {
        let caught = panic::catch_unwind(|| {
            ObservationBuilder::new("test")
                .rescue(RescuePolicy::ErrorsOnly)
                .observe::<i32, String, _>(|| panic!("fatal"))
        });

        assert!(caught.is_err());
    }

    #[test]
    fn test_fabricated_timing_used_verbatim() {
        let ob: Observation<i32, String> = ObservationBuilder::new("test")
            .fabricated(Some(Timing::new(0.5).with_cpu_time(0.25)))
            .observe(|| Ok(1));

        assert!((ob.duration() - 0.5).abs() < f64::EPSILON);
        assert_eq!(ob.cpu_time(), Some(0.25));
    }

    #[test]
    fn test_cleaned_value_distinguishes_false_from_absent() {
        let ob: Observation<bool, String> = Observation::new("test", || Ok(false));
        assert_eq!(ob.cleaned_value(), Some(CleanedValue::Raw(&false)));

        let failed: Observation<bool, String> = Observation::new("test", || Err("no".into()));
        assert_eq!(failed.cleaned_value(), None);
        assert_eq!(failed.with_cleaned(true.into()).cleaned_value(), None);
    }

    #[test]
    fn test_cleaned_value_renders_projection_as_json() {
        let ob: Observation<Vec<u32>, String> = Observation::new("test", || Ok(vec![1, 2]));
        assert_eq!(format!("{:?}", ob.cleaned_value().unwrap()), "[1, 2]");

        let ob = ob.with_cleaned(serde_json::json!({"count": 2}));
        assert_eq!(format!("{:?}", ob.cleaned_value().unwrap()), r#"{"count":2}"#);
    }

    #[test]
    fn test_panic_and_error_never_equivalent() {
        let a: Observation<i32, String> = Observation::new("a", || Err("boom".into()));
        let b: Observation<i32, String> = Observation::new("b", || panic!("boom"));

        assert!(!a.equivalent_to(&b));
        assert!(!b.equivalent_to(&a));
    }

    #[test]
    fn test_panic_site_is_the_behavior() {
        let ob: Observation<i32, String> = Observation::new("test", || panic!("kaboom"));

        let Some(Failure::Panic(panic)) = ob.failure() else {
            panic!("expected a panic");
        };
        assert!(panic.location().unwrap().contains("observation.rs"));
        if let Some(backtrace) = panic.backtrace() {
            assert!(backtrace.contains("test_panic_site_is_the_behavior"));
        }
    }

    #[test]
    fn test_caught_panic_inside_behavior_leaves_no_site() {
        let ob: Observation<i32, String> = Observation::new("test", || {
            let _ = panic::catch_unwind(|| panic!("handled"));
            Ok(1)
        });
        assert_eq!(*ob.value().unwrap(), 1);
        assert!(PANIC_SITE.with(|slot| slot.borrow().is_none()));
    }

    #[test]
    fn test_error_kind_names() {
        #[derive(Debug)]
        enum Kind {
            Timeout(String),
        }
        #[derive(Debug, thiserror::Error)]
        #[error("same")]
        struct Root;

        assert_eq!(error_kind(&Kind::Timeout("x".into())), "Timeout");
        assert_eq!(error_kind(&anyhow::Error::new(Root).context("outer")), "Root");
        assert_eq!(error_kind(&anyhow::anyhow!("ad hoc")), "");
        assert_eq!(error_kind(&"plain".to_string()), "");
        assert_eq!(error_kind(&-1_i32), "");
    }

    #[test]
    fn test_panic_message_fallback() {
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
