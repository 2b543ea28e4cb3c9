//! Experiment - behavior registration, configuration and the run protocol
//!
//! ## Run protocol
//!
//! ```text
//! run(control)
//!   ├── freeze behaviors + context
//!   ├── control registered? ── no ──> Error::BehaviorMissing
//!   ├── >1 behavior && enabled() && run_if()? ── no ──> call control directly
//!   ├── before_run()
//!   ├── observe every behavior, shuffled
//!   ├── ExperimentResult::new (compare, ignore, cohort)
//!   ├── publish(result)
//!   ├── raise on mismatch? ──> RunError::Mismatch
//!   └── control value, or control failure re-raised
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_science::{DefaultPublisher, Experiment};
//!
//! let mut experiment: Experiment<u64> =
//!     Experiment::with_publisher("checksum", DefaultPublisher::new(true));
//! experiment.use_control(|| Ok(40 + 2))?;
//! experiment.candidate(|| Ok(6 * 7))?;
//!
//! assert_eq!(experiment.run().map_err(|e| e.to_string())?, 42);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod hooks;

pub use hooks::{
    BeforeRun, Cleaner, CohortRule, Comparator, ErrorComparator, IgnoreRule, MismatchMapper,
    Operation, RunIf,
};

use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::config::ExperimentConfig;
use crate::error::RunError;
use crate::mismatch::MismatchError;
use crate::observation::{Behavior, Failure, Observation, ObservationBuilder, Timing};
use crate::publisher::{DefaultPublisher, Publisher};
use crate::result::ExperimentResult;
use crate::{Error, Result};

/// Extra metadata attached to an experiment and copied into every result.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Name used by `use_control` and the default for `run`.
pub const CONTROL: &str = "control";

/// Name used by `candidate`.
pub const CANDIDATE: &str = "candidate";

/// An experiment comparing a control behavior against candidates.
///
/// Behaviors and context are append-only until the first run, after which
/// they are frozen and mutators fail with `Error::Frozen`. `run` takes
/// `&self`, so a frozen experiment can be run from several threads at once.
pub struct Experiment<T, E = anyhow::Error, P = DefaultPublisher> {
    name: String,
    publisher: P,
    config: ExperimentConfig,
    raise_on_mismatches: Option<bool>,
    behaviors: IndexMap<String, Behavior<T, E>>,
    context: Context,
    comparator: Option<Comparator<T>>,
    error_comparator: Option<ErrorComparator<E>>,
    cleaner: Option<Cleaner<T>>,
    ignores: Vec<IgnoreRule<T>>,
    run_if: Option<RunIf>,
    before_run: Option<BeforeRun>,
    cohort: Option<CohortRule<T, E>>,
    raise_with: Option<MismatchMapper<T, E>>,
    fabricated: HashMap<String, Timing>,
    frozen: AtomicBool,
}

impl<T, E> Experiment<T, E, DefaultPublisher> {
    /// Create an experiment with the no-op, disabled publisher.
    ///
    /// Such an experiment only ever runs its control; wire a real publisher
    /// with [`Experiment::with_publisher`] to observe candidates.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_publisher(name, DefaultPublisher::default())
    }
}

impl<T, E, P> Experiment<T, E, P> {
    /// Create an experiment reporting to `publisher`.
    #[must_use]
    pub fn with_publisher(name: impl Into<String>, publisher: P) -> Self {
        Self::with_config(name, publisher, ExperimentConfig::default())
    }

    /// Create an experiment with explicit configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, publisher: P, config: ExperimentConfig) -> Self {
        Self {
            name: name.into(),
            publisher,
            config,
            raise_on_mismatches: None,
            behaviors: IndexMap::new(),
            context: Context::new(),
            comparator: None,
            error_comparator: None,
            cleaner: None,
            ignores: Vec::new(),
            run_if: None,
            before_run: None,
            cohort: None,
            raise_with: None,
            fabricated: HashMap::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The publisher.
    #[must_use]
    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// The configuration the experiment was built with.
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Registered behavior names, in registration order.
    pub fn behavior_names(&self) -> impl Iterator<Item = &str> {
        self.behaviors.keys().map(String::as_str)
    }

    /// Whether a run has started.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn ensure_unfrozen(&mut self) -> Result<()> {
        if *self.frozen.get_mut() {
            return Err(Error::Frozen {
                experiment: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Register a behavior under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::BehaviorNotUnique` if `name` is taken, or
    /// `Error::Frozen` after the first run.
    pub fn try_named<F>(&mut self, name: impl Into<String>, behavior: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;

        let name = name.into();
        if self.behaviors.contains_key(&name) {
            return Err(Error::BehaviorNotUnique {
                experiment: self.name.clone(),
                behavior: name,
            });
        }

        self.behaviors.insert(name, Box::new(behavior));
        Ok(())
    }

    /// Register the `"candidate"` behavior.
    ///
    /// # Errors
    ///
    /// See [`Experiment::try_named`].
    pub fn candidate<F>(&mut self, behavior: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        self.try_named(CANDIDATE, behavior)
    }

    /// Register the `"control"` behavior.
    ///
    /// # Errors
    ///
    /// See [`Experiment::try_named`].
    pub fn use_control<F>(&mut self, behavior: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        self.try_named(CONTROL, behavior)
    }

    /// The experiment's context.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Merge `context` into the experiment's context, overwriting keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::Frozen` after the first run.
    pub fn merge_context(&mut self, context: Context) -> Result<&Context> {
        self.ensure_unfrozen()?;
        self.context.extend(context);
        Ok(&self.context)
    }

    /// Set a single context entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Frozen` after the first run.
    pub fn add_context(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<()> {
        self.ensure_unfrozen()?;
        self.context.insert(key.into(), value.into());
        Ok(())
    }

    /// Compare values with `comparator` instead of `==`.
    pub fn compare<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.comparator = Some(Box::new(comparator));
        self
    }

    /// Compare returned errors with `comparator` instead of by message.
    pub fn compare_errors<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&E, &E) -> bool + Send + Sync + 'static,
    {
        self.error_comparator = Some(Box::new(comparator));
        self
    }

    /// Project values into the form shown in reports and mismatch messages,
    /// for example a list of records down to their ids. Comparison always
    /// uses raw values.
    pub fn clean<F, V>(&mut self, cleaner: F) -> &mut Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<serde_json::Value>,
    {
        self.cleaner = Some(Box::new(move |value| cleaner(value).into()));
        self
    }

    /// The configured cleaner, if any.
    #[must_use]
    pub fn cleaner(&self) -> Option<&(dyn Fn(&T) -> serde_json::Value + Send + Sync)> {
        self.cleaner.as_deref()
    }

    /// Add a rule suppressing mismatches for which it returns `true`.
    ///
    /// Rules receive `(control value, candidate value)`, with `None` for a
    /// side that failed, and are consulted in registration order until one
    /// matches.
    ///
    /// ```rust
    /// use trueno_science::Experiment;
    ///
    /// let mut experiment: Experiment<u32> = Experiment::new("quota");
    /// // A candidate that times out is a known gap, not a regression.
    /// experiment.ignore(|_, candidate| candidate.is_none());
    /// ```
    pub fn ignore<F>(&mut self, rule: F) -> &mut Self
    where
        F: Fn(Option<&T>, Option<&T>) -> bool + Send + Sync + 'static,
    {
        self.ignores.push(Box::new(rule));
        self
    }

    /// Only experiment when `gate` returns `true`.
    pub fn run_if<F>(&mut self, gate: F) -> &mut Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.run_if = Some(Box::new(gate));
        self
    }

    /// Call `hook` before behaviors run, only when experimenting.
    pub fn before_run<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.before_run = Some(Box::new(hook));
        self
    }

    /// Assign each result a cohort.
    pub fn determine_cohort<F>(&mut self, rule: F) -> &mut Self
    where
        F: Fn(&ExperimentResult<T, E>) -> String + Send + Sync + 'static,
    {
        self.cohort = Some(Box::new(rule));
        self
    }

    /// Override the configured mismatch raising for this experiment.
    pub fn raise_on_mismatches(&mut self, raise: bool) -> &mut Self {
        self.raise_on_mismatches = Some(raise);
        self
    }

    /// Whether a mismatched run fails after publishing.
    #[must_use]
    pub fn raises_on_mismatches(&self) -> bool {
        self.raise_on_mismatches
            .unwrap_or_else(|| self.config.raise_on_mismatches())
    }

    /// Raise a custom failure built from the mismatch instead of
    /// [`MismatchError`] itself.
    pub fn raise_with<F>(&mut self, mapper: F) -> &mut Self
    where
        F: Fn(MismatchError<T, E>) -> anyhow::Error + Send + Sync + 'static,
    {
        self.raise_with = Some(Box::new(mapper));
        self
    }

    /// Report these timings instead of measuring, keyed by behavior name.
    /// Behaviors without an entry are timed normally.
    pub fn fabricate_durations_for_testing_purposes<K, V>(
        &mut self,
        timings: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        K: Into<String>,
        V: Into<Timing>,
    {
        self.fabricated = timings
            .into_iter()
            .map(|(name, timing)| (name.into(), timing.into()))
            .collect();
        self
    }
}

impl<T, E, P> Experiment<T, E, P>
where
    T: PartialEq + Debug + Send + Sync + 'static,
    E: Display + Debug + Send + Sync + 'static,
    P: Publisher<T, E>,
{
    /// Run with `"control"` as the control.
    ///
    /// # Errors
    ///
    /// See [`Experiment::run_named`].
    pub fn run(&self) -> std::result::Result<T, RunError<E>> {
        self.run_named(CONTROL)
    }

    /// Run the experiment, returning the outcome of behavior `control`.
    ///
    /// Candidates never affect what is returned: their errors and panics are
    /// recorded, compared and published, never surfaced. A control that
    /// panicked while observed resumes unwinding with its original payload.
    ///
    /// # Errors
    ///
    /// - `RunError::Control` with the control's own error
    /// - `RunError::Mismatch` if mismatch raising is on and the run mismatched
    /// - `RunError::Experiment` for a missing control or a re-raised hook failure
    pub fn run_named(&self, control: &str) -> std::result::Result<T, RunError<E>> {
        self.frozen.store(true, Ordering::Release);

        let Some(behavior) = self.behaviors.get(control) else {
            return Err(Error::BehaviorMissing {
                experiment: self.name.clone(),
                behavior: control.to_string(),
            }
            .into());
        };

        if !self.should_experiment()? {
            debug!(experiment = %self.name, control, "experiment skipped, running control only");
            return behavior().map_err(RunError::Control);
        }

        if let Some(hook) = &self.before_run {
            hook();
        }

        let mut order: Vec<&String> = self.behaviors.keys().collect();
        order.shuffle(&mut rand::thread_rng());
        debug!(experiment = %self.name, order = ?order, "observing behaviors");

        let observations = order
            .into_iter()
            .map(|name| self.observe(name, &self.behaviors[name]))
            .collect::<Result<Vec<_>>>()?;

        let result = ExperimentResult::new(self, observations, control)?;
        if result.is_mismatched() {
            debug!(
                experiment = %self.name,
                mismatched = result.mismatched().len(),
                "candidates mismatched"
            );
        }

        self.hook(Operation::Publish, || self.publisher.publish(&result))?;

        if self.raises_on_mismatches() && result.is_mismatched() {
            let mismatch = MismatchError::new(result);
            let error = match &self.raise_with {
                Some(mapper) => mapper(mismatch),
                None => anyhow::Error::new(mismatch),
            };
            return Err(RunError::Mismatch(error));
        }

        match result.into_control() {
            Ok(value) => Ok(value),
            Err(Failure::Error(error)) => Err(RunError::Control(error)),
            Err(Failure::Panic(panic)) => panic.resume(),
        }
    }

    fn should_experiment(&self) -> Result<bool> {
        if self.behaviors.len() < 2 {
            return Ok(false);
        }

        let enabled = self
            .hook(Operation::Enabled, || self.publisher.enabled())?
            .unwrap_or(false);
        if !enabled {
            return Ok(false);
        }

        match &self.run_if {
            Some(gate) => Ok(self.hook(Operation::RunIf, || Ok(gate()))?.unwrap_or(false)),
            None => Ok(true),
        }
    }

    fn observe(&self, name: &str, behavior: &Behavior<T, E>) -> Result<Observation<T, E>> {
        let observation = ObservationBuilder::new(name)
            .experiment(&self.name)
            .rescue(self.config.rescue())
            .fabricated(self.fabricated.get(name).copied())
            .observe(|| behavior());

        if let Some(failure) = observation.failure() {
            debug!(experiment = %self.name, behavior = name, %failure, "behavior failed");
        }

        let cleaned = match observation.try_value() {
            Some(value) => self.clean_value(value)?,
            None => None,
        };
        Ok(match cleaned {
            Some(cleaned) => observation.with_cleaned(cleaned),
            None => observation,
        })
    }

    /// Apply the cleaner to `value`.
    ///
    /// `Ok(None)` means the raw value should be shown: no cleaner is
    /// configured, or it failed and the publisher swallowed the failure.
    ///
    /// # Errors
    ///
    /// Returns `Error::Hook` if the cleaner failed and the publisher re-raised.
    pub fn clean_value(&self, value: &T) -> Result<Option<serde_json::Value>> {
        match &self.cleaner {
            Some(cleaner) => self.hook(Operation::Clean, || Ok(cleaner(value))),
            None => Ok(None),
        }
    }

    /// Whether `candidate` is equivalent to `control` under the configured
    /// comparators. A failing comparator counts as "not equivalent".
    ///
    /// # Errors
    ///
    /// Returns `Error::Hook` if a comparator failed and the publisher re-raised.
    pub fn observations_are_equivalent(
        &self,
        control: &Observation<T, E>,
        candidate: &Observation<T, E>,
    ) -> Result<bool> {
        let comparator = self
            .comparator
            .as_deref()
            .map(|c| c as &dyn Fn(&T, &T) -> bool);
        let error_comparator = self
            .error_comparator
            .as_deref()
            .map(|c| c as &dyn Fn(&E, &E) -> bool);

        let equivalent = self.hook(Operation::Compare, || {
            Ok(control.equivalent_with(candidate, comparator, error_comparator))
        })?;
        Ok(equivalent.unwrap_or(false))
    }

    /// Whether any ignore rule suppresses the mismatch between `control`
    /// and `candidate`. A failing rule counts as "don't ignore" and the
    /// remaining rules are still consulted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Hook` if a rule failed and the publisher re-raised.
    pub fn ignore_mismatched_observation(
        &self,
        control: &Observation<T, E>,
        candidate: &Observation<T, E>,
    ) -> Result<bool> {
        let (a, b) = (control.try_value(), candidate.try_value());

        for rule in &self.ignores {
            if self.hook(Operation::Ignore, || Ok(rule(a, b)))? == Some(true) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn determine_cohort_for(
        &self,
        result: &ExperimentResult<T, E>,
    ) -> Result<Option<String>> {
        match &self.cohort {
            Some(rule) => self.hook(Operation::Cohort, || Ok(rule(result))),
            None => Ok(None),
        }
    }

    /// Run an internal hook. `Ok(None)` means it failed and the publisher
    /// swallowed the failure.
    fn hook<R>(
        &self,
        operation: Operation,
        hook: impl FnOnce() -> anyhow::Result<R>,
    ) -> Result<Option<R>> {
        match hooks::guarded(self.config.rescue(), hook) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(experiment = %self.name, %operation, %error, "experiment hook failed");
                self.publisher
                    .raised(operation, error)
                    .map(|()| None)
                    .map_err(|source| Error::Hook { operation, source })
            }
        }
    }
}

impl<T, E, P: Debug> Debug for Experiment<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("publisher", &self.publisher)
            .field("config", &self.config)
            .field("behaviors", &self.behaviors.keys().collect::<Vec<_>>())
            .field("context", &self.context)
            .field("ignores", &self.ignores.len())
            .field("frozen", &self.is_frozen())
            .finish_non_exhaustive()
    }
}
