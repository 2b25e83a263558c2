// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Run output, serialised by one lock.
//!
//! In streaming mode (a single runner) output is printed as it arrives, so the console is a
//! live view of the one action executing. In multiplexing mode fragments accumulate in
//! per-outcome buffers and each buffer is flushed atomically when its outcome finishes, so
//! concurrent actions cannot interleave.

use std::collections::HashMap;
use std::io::Write;

use colored::Colorize;
use outcome::{ResultValue, RunResult};
use outcome_store::AnnotatedOutcome;
use parking_lot::Mutex;

pub struct Console {
    streaming: bool,
    verbose: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    buffers: HashMap<String, String>,
    // Whether the current streamed line is mid-way, so verdicts start on a fresh line.
    mid_line: bool,
}

impl Console {
    pub fn new(streaming: bool, verbose: bool) -> Console {
        Console {
            streaming,
            verbose,
            state: Mutex::new(State::default()),
        }
    }

    /// Output from the wire for a specific outcome.
    pub fn output(&self, outcome_name: &str, fragment: &str) {
        let mut state = self.state.lock();
        if self.streaming {
            print!("{fragment}");
            let _ = std::io::stdout().flush();
            state.mid_line = !fragment.ends_with('\n');
        } else {
            state
                .buffers
                .entry(outcome_name.to_owned())
                .or_default()
                .push_str(fragment);
        }
    }

    /// Unstructured output not attributable to any outcome.
    pub fn print(&self, text: &str) {
        let mut state = self.state.lock();
        if state.mid_line {
            println!();
            state.mid_line = false;
        }
        println!("{text}");
    }

    /// The verdict line for a completed outcome, plus its buffered or failing output.
    pub fn result(&self, annotated: &AnnotatedOutcome) {
        let mut state = self.state.lock();
        if state.mid_line {
            println!();
            state.mid_line = false;
        }

        let outcome = annotated.outcome();
        let value = annotated.result_value();
        println!("{} {} ({})", outcome.name(), verdict(value), outcome.result());

        let buffered = state.buffers.remove(outcome.name()).unwrap_or_default();
        // Streaming already printed the output live; multiplexing flushes the buffer now,
        // for failures always and for successes only when verbose.
        if !self.streaming && (value == ResultValue::Fail || self.verbose) {
            for line in buffered.lines() {
                println!("  {line}");
            }
        }
        if value == ResultValue::Fail {
            let expected = annotated.expectation().result();
            if expected != outcome.result() {
                println!("  expected {} but was {}", expected, outcome.result());
            }
            if annotated.changed_since_tag() {
                println!("  changed since tagged baseline");
            }
        }
    }

    ///
    /// The final comparative summary: deterministic for a given set of outcomes, so runs are
    /// diffable. Callers pass records already sorted by name.
    ///
    pub fn summary(&self, records: &[SummaryRecord]) {
        let _state = self.state.lock();
        let passed = records.iter().filter(|r| r.value == ResultValue::Ok).count();
        let failed = records
            .iter()
            .filter(|r| r.value == ResultValue::Fail)
            .count();
        let skipped = records
            .iter()
            .filter(|r| r.value == ResultValue::Ignore)
            .count();

        println!();
        for record in records {
            if record.value == ResultValue::Fail {
                println!(
                    "{} {}: expected {} but was {}",
                    "FAIL".red(),
                    record.name,
                    record.expected,
                    record.actual
                );
            }
        }
        println!(
            "Outcomes: {}. Passed: {}, Failed: {}, Skipped: {}.",
            records.len(),
            passed,
            failed,
            skipped
        );
    }
}

pub struct SummaryRecord {
    pub name: String,
    pub actual: RunResult,
    pub expected: RunResult,
    pub value: ResultValue,
}

fn verdict(value: ResultValue) -> colored::ColoredString {
    match value {
        ResultValue::Ok => "OK".green(),
        ResultValue::Fail => "FAIL".red(),
        ResultValue::Ignore => "IGNORE".yellow(),
    }
}
