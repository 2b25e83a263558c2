// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;
use std::sync::Arc;

use expectation::ExpectationStore;
use outcome::{Outcome, ResultValue, RunResult};

use super::OutcomeStore;

fn store(results_dir: PathBuf) -> OutcomeStore {
    OutcomeStore::new(
        results_dir,
        None,
        None,
        None,
        Arc::new(ExpectationStore::empty()),
    )
}

fn at(seconds: i64, result: RunResult, lines: &[&str]) -> Outcome {
    Outcome::recorded_at(
        "a.b.CTest#m",
        result,
        lines.iter().map(|s| (*s).to_owned()).collect(),
        chrono::DateTime::from_timestamp(seconds, 0).unwrap(),
    )
}

#[test]
fn roundtrips_an_outcome_through_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store(dir.path().to_owned());

    let outcome = at(1_000_000, RunResult::ExecFailed, &["first", "  indented", ""]);
    store.write(&outcome, true).unwrap();

    let annotated = store.read(at(2_000_000, RunResult::ExecFailed, &["other"]));
    assert_eq!(annotated.previous().len(), 1);
    let prior = &annotated.previous()[0];
    assert_eq!(prior.result(), RunResult::ExecFailed);
    assert_eq!(prior.output_lines(), ["first", "  indented", ""]);
    assert!(prior.same_behavior_as(&outcome));
}

#[test]
fn history_is_reverse_chronological() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store(dir.path().to_owned());

    store.write(&at(1_000, RunResult::Success, &["old"]), true).unwrap();
    store.write(&at(5_000, RunResult::Success, &["newer"]), true).unwrap();
    store.write(&at(3_000, RunResult::Success, &["middle"]), true).unwrap();

    let annotated = store.read(at(9_000, RunResult::Success, &["now"]));
    let outputs: Vec<_> = annotated
        .previous()
        .iter()
        .map(|o| o.output_lines()[0].clone())
        .collect();
    assert_eq!(outputs, ["newer", "middle", "old"]);
}

#[test]
fn unchanged_outcomes_share_a_history_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store(dir.path().to_owned());

    store.write(&at(1_000, RunResult::Success, &["same"]), true).unwrap();
    store.write(&at(2_000, RunResult::Success, &["same"]), false).unwrap();
    store.write(&at(3_000, RunResult::Success, &["same"]), false).unwrap();

    let history_dir = dir.path().join("auto/a/b/CTest/m");
    let xml_files = std::fs::read_dir(&history_dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".xml"))
        .count();
    assert_eq!(xml_files, 1);

    // But the sidecar remembers every run.
    let meta = std::fs::read_to_string(history_dir.join(".meta")).unwrap();
    assert_eq!(meta.lines().count(), 3);
    let recorded: Vec<_> = meta
        .lines()
        .map(|line| line.split_once(' ').unwrap().1)
        .collect();
    assert_eq!(recorded[0], recorded[1]);
    assert_eq!(recorded[1], recorded[2]);
}

#[test]
fn first_write_records_even_when_unchanged() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store(dir.path().to_owned());
    store.write(&at(1_000, RunResult::Success, &["out"]), false).unwrap();

    let annotated = store.read(at(2_000, RunResult::Success, &["out"]));
    assert_eq!(annotated.previous().len(), 1);
}

#[test]
fn change_detection_against_history() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store(dir.path().to_owned());

    let annotated = store.read(at(1_000, RunResult::Success, &["out"]));
    // No history at all counts as changed.
    assert!(annotated.changed_since_previous());
    store.write(annotated.outcome(), annotated.changed_since_previous()).unwrap();

    let same = store.read(at(2_000, RunResult::Success, &["out"]));
    assert!(!same.changed_since_previous());

    let different = store.read(at(3_000, RunResult::ExecFailed, &["boom"]));
    assert!(different.changed_since_previous());
    assert!(different.is_noteworthy());
}

#[test]
fn tags_are_written_and_compared() {
    let dir = tempfile::TempDir::new().unwrap();
    let tagging = OutcomeStore::new(
        dir.path().join("results"),
        Some(dir.path().join("tags")),
        Some("baseline".to_owned()),
        None,
        Arc::new(ExpectationStore::empty()),
    );
    tagging.write(&at(1_000, RunResult::Success, &["ok"]), true).unwrap();
    assert!(dir
        .path()
        .join("tags/results/baseline/a/b/CTest/m/canonical.xml")
        .exists());

    let comparing = OutcomeStore::new(
        dir.path().join("results"),
        Some(dir.path().join("tags")),
        None,
        Some("baseline".to_owned()),
        Arc::new(ExpectationStore::empty()),
    );
    let unchanged = comparing.read(at(2_000, RunResult::Success, &["ok"]));
    assert!(unchanged.tag_outcome().is_some());
    assert!(!unchanged.changed_since_tag());

    let regressed = comparing.read(at(3_000, RunResult::ExecFailed, &["boom"]));
    assert!(regressed.changed_since_tag());
    assert!(regressed.is_noteworthy());
}

#[test]
fn annotation_carries_the_resolved_expectation() {
    let dir = tempfile::TempDir::new().unwrap();
    let expectations = {
        let file = dir.path().join("expectations.json");
        std::fs::write(
            &file,
            r#"[{"name": "a.b.CTest#m", "result": "EXEC_FAILED"}]"#,
        )
        .unwrap();
        Arc::new(ExpectationStore::parse(&[file]).unwrap())
    };
    let store = OutcomeStore::new(dir.path().to_owned(), None, None, None, expectations);

    let known_failure = store.read(at(1_000, RunResult::ExecFailed, &["boom"]));
    assert_eq!(known_failure.result_value(), ResultValue::Ignore);

    let success = store.read(at(2_000, RunResult::Success, &["fine"]));
    assert_eq!(success.result_value(), ResultValue::Fail);
}
