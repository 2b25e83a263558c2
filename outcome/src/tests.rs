// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::str::FromStr;

use super::{sanitize_xml_text, Outcome, RunResult};

#[test]
fn result_string_forms() {
    assert_eq!(RunResult::Success.to_string(), "SUCCESS");
    assert_eq!(RunResult::CompileFailed.to_string(), "COMPILE_FAILED");
    assert_eq!(RunResult::ExecTimeout.to_string(), "EXEC_TIMEOUT");
    assert_eq!(
        RunResult::from_str("EXEC_FAILED").unwrap(),
        RunResult::ExecFailed
    );
    assert!(RunResult::from_str("NO_SUCH_RESULT").is_err());
}

#[test]
fn combined_output_preserves_order() {
    let outcome = Outcome::new(
        "ex.T#m",
        RunResult::Success,
        vec!["first".to_owned(), "second".to_owned(), "third".to_owned()],
    );
    assert_eq!(outcome.combined_output(), "first\nsecond\nthird");
}

#[test]
fn same_behavior_ignores_timestamps() {
    let a = Outcome::new("ex.T", RunResult::Success, vec!["out".to_owned()]);
    let b = Outcome::recorded_at(
        "ex.T",
        RunResult::Success,
        vec!["out".to_owned()],
        chrono::DateTime::UNIX_EPOCH,
    );
    assert!(a.same_behavior_as(&b));

    let c = Outcome::new("ex.T", RunResult::ExecFailed, vec!["out".to_owned()]);
    assert!(!a.same_behavior_as(&c));

    let d = Outcome::new("ex.T", RunResult::Success, vec!["different".to_owned()]);
    assert!(!a.same_behavior_as(&d));
}

#[test]
fn sanitize_passes_ordinary_text_through() {
    let text = "plain text, with\ttabs\nand newlines \u{00A0} and high planes are escaped";
    assert_eq!(sanitize_xml_text(text), text);
}

#[test]
fn sanitize_escapes_control_characters() {
    assert_eq!(sanitize_xml_text("a\u{0}b"), "aU+0000b");
    assert_eq!(sanitize_xml_text("bell\u{7}"), "bellU+0007");
    assert_eq!(sanitize_xml_text("\u{FFFE}"), "U+FFFE");
}
