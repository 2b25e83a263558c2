// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use chrono::{DateTime, Utc};

///
/// The closed set of ways running one test point can end.
///
/// These names appear verbatim on the wire, in expectation files and in the recorded history, so
/// the string forms are part of the external contract.
///
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunResult {
    Success,
    CompileFailed,
    ExecFailed,
    ExecTimeout,
    Unsupported,
    Error,
}

///
/// How an outcome stacks up against its resolved expectation.
///
/// `Ignore` is the verdict for a known breakage: the outcome failed, but in exactly the way an
/// expectation said it would, so it counts as skipped rather than as a regression.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultValue {
    Ok,
    Fail,
    Ignore,
}

///
/// The result of running one discrete test point: a qualified name, how it ended, and the output
/// it produced, in arrival order. Immutable after construction.
///
#[derive(Clone, Debug)]
pub struct Outcome {
    name: String,
    result: RunResult,
    output_lines: Vec<String>,
    completed_at: DateTime<Utc>,
}

impl Outcome {
    pub fn new(name: &str, result: RunResult, output_lines: Vec<String>) -> Outcome {
        Outcome {
            name: name.to_owned(),
            result,
            output_lines,
            completed_at: Utc::now(),
        }
    }

    /// An outcome carrying a single block of diagnostic text, such as a compiler error.
    pub fn from_text(name: &str, result: RunResult, text: &str) -> Outcome {
        Outcome::new(name, result, text.lines().map(str::to_owned).collect())
    }

    /// Reconstructs a historical outcome, preserving its original completion time.
    pub fn recorded_at(
        name: &str,
        result: RunResult,
        output_lines: Vec<String>,
        completed_at: DateTime<Utc>,
    ) -> Outcome {
        Outcome {
            name: name.to_owned(),
            result,
            output_lines,
            completed_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result(&self) -> RunResult {
        self.result
    }

    pub fn output_lines(&self) -> &[String] {
        &self.output_lines
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// All output joined with newlines, the form expectation patterns are matched against.
    pub fn combined_output(&self) -> String {
        self.output_lines.join("\n")
    }

    ///
    /// Whether this outcome and `other` describe the same behavior: same result, same output.
    /// Completion time is bookkeeping, not behavior, so it is excluded. This is the comparison
    /// the history store uses to decide whether a run changed anything.
    ///
    pub fn same_behavior_as(&self, other: &Outcome) -> bool {
        self.name == other.name
            && self.result == other.result
            && self.output_lines == other.output_lines
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.result)
    }
}

///
/// Replaces codepoints that may not appear in XML 1.0 character data with visible `U+XXXX`
/// escapes, so arbitrary process output can be carried in the wire protocol and the history
/// files without producing unparseable documents.
///
pub fn sanitize_xml_text(text: &str) -> String {
    fn permitted(c: char) -> bool {
        matches!(c,
            '\t' | '\n' | '\r'
            | '\u{20}'..='\u{7E}'
            | '\u{A0}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}')
    }

    if text.chars().all(permitted) {
        return text.to_owned();
    }
    text.chars()
        .map(|c| {
            if permitted(c) {
                c.to_string()
            } else {
                format!("U+{:04X}", c as u32)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests;
