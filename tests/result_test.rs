//! Experiment result partitioning tests

mod common;

use common::{boom, AppError};
use trueno_science::observation::ObservationBuilder;
use trueno_science::{DefaultPublisher, Error, Experiment, ExperimentResult, Observation};

fn experiment() -> Experiment<i32, AppError> {
    Experiment::with_publisher("experiment", DefaultPublisher::new(true))
}

fn value(name: &str, v: i32) -> Observation<i32, AppError> {
    ObservationBuilder::new(name).observe(move || Ok(v))
}

fn names(observations: Vec<&Observation<i32, AppError>>) -> Vec<&str> {
    observations.into_iter().map(Observation::name).collect()
}

// =============================================================================
// Partitioning
// =============================================================================

#[test]
fn test_evaluates_candidates_against_control() {
    let ex = experiment();
    let observations = vec![value("a", 1), value("b", 1), value("c", 2), value("d", 3)];

    let result = ExperimentResult::new(&ex, observations, "a").unwrap();

    assert_eq!(result.control().name(), "a");
    assert_eq!(names(result.candidates()), vec!["b", "c", "d"]);
    assert_eq!(names(result.mismatched()), vec!["c", "d"]);
    assert!(result.ignored().is_empty());
    assert!(result.is_mismatched());
    assert!(!result.is_matched());
}

#[test]
fn test_only_control_is_a_match() {
    let ex = experiment();
    let result = ExperimentResult::new(&ex, vec![value("control", 1)], "control").unwrap();

    assert!(result.candidates().is_empty());
    assert!(result.is_matched());
    assert!(!result.is_mismatched());
    assert!(!result.is_ignored());
}

#[test]
fn test_ignored_and_mismatched_are_disjoint() {
    let mut ex = experiment();
    ex.ignore(|_, candidate| candidate == Some(&2));
    let observations = vec![value("control", 1), value("two", 2), value("three", 3)];

    let result = ExperimentResult::new(&ex, observations, "control").unwrap();

    assert_eq!(names(result.ignored()), vec!["two"]);
    assert_eq!(names(result.mismatched()), vec!["three"]);
    assert!(result.is_ignored());
    assert!(result.is_mismatched());
    assert!(!result.is_matched());
}

#[test]
fn test_ignored_only_is_neither_matched_nor_mismatched() {
    let mut ex = experiment();
    ex.ignore(|_, _| true);
    let observations = vec![value("control", 1), value("candidate", 2)];

    let result = ExperimentResult::new(&ex, observations, "control").unwrap();

    assert!(!result.is_matched());
    assert!(!result.is_mismatched());
    assert!(result.is_ignored());
}

#[test]
fn test_uses_experiment_comparator() {
    let mut ex = experiment();
    ex.compare(|a, b| a % 10 == b % 10);
    let observations = vec![value("control", 1), value("candidate", 11)];

    let result = ExperimentResult::new(&ex, observations, "control").unwrap();
    assert!(result.is_matched());
}

#[test]
fn test_failed_candidates_mismatch_values() {
    let ex = experiment();
    let observations = vec![
        value("control", 1),
        ObservationBuilder::new("candidate").observe(|| Err(boom("nope"))),
    ];

    let result = ExperimentResult::new(&ex, observations, "control").unwrap();
    assert_eq!(names(result.mismatched()), vec!["candidate"]);
}

#[test]
fn test_missing_control_is_an_error() {
    let ex = experiment();
    let err = ExperimentResult::new(&ex, vec![value("a", 1)], "control").unwrap_err();

    assert!(matches!(
        err,
        Error::BehaviorMissing { ref behavior, .. } if behavior == "control"
    ));
    assert_eq!(err.to_string(), "experiment missing control behavior");
}

// =============================================================================
// Metadata and report
// =============================================================================

#[test]
fn test_copies_context_and_name() {
    let mut ex = experiment();
    ex.add_context("user", 42).unwrap();

    let result = ExperimentResult::new(&ex, vec![value("control", 1)], "control").unwrap();

    assert_eq!(result.experiment_name(), "experiment");
    assert_eq!(result.context()["user"], 42);
    assert!(result.observation("control").is_some());
    assert!(result.observation("missing").is_none());
}

#[test]
fn test_cohort_rule_sees_partition() {
    let mut ex = experiment();
    ex.determine_cohort(|result| format!("{}-mismatched", result.mismatched().len()));
    let observations = vec![value("control", 1), value("a", 2), value("b", 1)];

    let result = ExperimentResult::new(&ex, observations, "control").unwrap();
    assert_eq!(result.cohort(), Some("1-mismatched"));
}

#[test]
fn test_report_serializes_to_json() {
    let mut ex = experiment();
    ex.add_context("request", "abc").unwrap();
    let observations = vec![value("control", 1), value("candidate", 2)];

    let result = ExperimentResult::new(&ex, observations, "control").unwrap();
    let json = result.report().to_json().unwrap();

    assert_eq!(json["experiment"], "experiment");
    assert_eq!(json["context"]["request"], "abc");
    assert_eq!(json["matched"], false);
    assert_eq!(json["control"]["value"], "1");
    assert_eq!(json["candidates"][0]["name"], "candidate");
    assert_eq!(json["mismatched"][0], "candidate");
    assert!(json["control"]["failure"].is_null());
}
