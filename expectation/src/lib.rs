// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use log::warn;
use outcome::{Outcome, ResultValue, RunResult};
use regex::Regex;
use serde_json::Value;

/// Tag that scales an action's timeout up for known-slow tests.
pub const LARGE_TAG: &str = "large";

///
/// A predicate plus the result it predicts.
///
/// An expectation matches an outcome when the outcome ended with the expected result and the
/// whole of its combined output matches the pattern. The default pattern matches anything.
///
#[derive(Debug)]
pub struct Expectation {
    result: RunResult,
    pattern: Regex,
    tags: Vec<String>,
    description: String,
    bug: Option<u64>,
}

static MATCH_ALL: LazyLock<Arc<Expectation>> = LazyLock::new(|| {
    Arc::new(Expectation {
        result: RunResult::Success,
        pattern: compile_pattern(".*").unwrap(),
        tags: Vec::new(),
        description: String::new(),
        bug: None,
    })
});

impl Expectation {
    ///
    /// The implicit expectation: plain success, any output. Returned by the store whenever no
    /// declared record applies, so lookups never produce "no expectation".
    ///
    pub fn implicit_success() -> Arc<Expectation> {
        MATCH_ALL.clone()
    }

    pub fn result(&self) -> RunResult {
        self.result
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn bug(&self) -> Option<u64> {
        self.bug
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Whether the outcome ended the way this expectation predicts.
    pub fn matches(&self, outcome: &Outcome) -> bool {
        self.result == outcome.result() && self.pattern.is_match(&outcome.combined_output())
    }

    pub fn pattern_matches(&self, output: &str) -> bool {
        self.pattern.is_match(output)
    }

    ///
    /// The verdict for an outcome judged against this expectation: `Ok` for an expected success,
    /// `Ignore` for a failure that failed exactly as declared, and `Fail` for everything else --
    /// including a success where a failure was declared, which is a fixed test the declaration
    /// no longer describes.
    ///
    pub fn result_value(&self, outcome: &Outcome) -> ResultValue {
        if self.matches(outcome) {
            if self.result == RunResult::Success {
                ResultValue::Ok
            } else {
                ResultValue::Ignore
            }
        } else {
            ResultValue::Fail
        }
    }
}

///
/// The declarative expectations database, loaded once at startup.
///
/// Two families of records exist: outcome expectations, keyed by a qualified name or a name
/// prefix, and failure expectations, matched by scanning a completed outcome's output.
///
#[derive(Debug)]
pub struct ExpectationStore {
    outcomes: HashMap<String, Arc<Expectation>>,
    failures: Vec<(String, Arc<Expectation>)>,
}

impl ExpectationStore {
    pub fn empty() -> ExpectationStore {
        ExpectationStore {
            outcomes: HashMap::new(),
            failures: Vec::new(),
        }
    }

    ///
    /// Loads and merges the given expectation files. Duplicate names, within or across files,
    /// fail the load: silently letting one record shadow another would make the database
    /// order-dependent.
    ///
    pub fn parse(files: &[impl AsRef<Path>]) -> Result<ExpectationStore, String> {
        let mut store = ExpectationStore::empty();
        for file in files {
            let file = file.as_ref();
            let contents = std::fs::read_to_string(file)
                .map_err(|e| format!("Failed to read expectation file {}: {e}", file.display()))?;
            store
                .load(&contents)
                .map_err(|e| format!("In expectation file {}: {e}", file.display()))?;
        }
        Ok(store)
    }

    fn load(&mut self, contents: &str) -> Result<(), String> {
        let records: Value =
            serde_json::from_str(contents).map_err(|e| format!("Invalid JSON: {e}"))?;
        let records = records
            .as_array()
            .ok_or_else(|| "Expected a top-level array of records".to_owned())?;
        for record in records {
            self.load_record(record)?;
        }
        Ok(())
    }

    fn load_record(&mut self, record: &Value) -> Result<(), String> {
        let record = record
            .as_object()
            .ok_or_else(|| format!("Expected a record object, got: {record}"))?;

        let mut names: Vec<String> = Vec::new();
        let mut failure: Option<String> = None;
        let mut result = RunResult::Success;
        let mut pattern: Option<String> = None;
        let mut substring: Option<String> = None;
        let mut tags: Vec<String> = Vec::new();
        let mut description = String::new();
        let mut bug: Option<u64> = None;

        for (key, value) in record {
            match key.as_str() {
                "name" => names.push(string_value(key, value)?),
                "names" => {
                    let values = value
                        .as_array()
                        .ok_or_else(|| format!("`names` must be an array, got: {value}"))?;
                    for v in values {
                        names.push(string_value(key, v)?);
                    }
                }
                "failure" => failure = Some(string_value(key, value)?),
                "result" => {
                    let s = string_value(key, value)?;
                    result = RunResult::from_str(&s)
                        .map_err(|_| format!("Unknown result `{s}`"))?;
                }
                "pattern" => pattern = Some(string_value(key, value)?),
                "substring" => substring = Some(string_value(key, value)?),
                "tags" => {
                    let values = value
                        .as_array()
                        .ok_or_else(|| format!("`tags` must be an array, got: {value}"))?;
                    for v in values {
                        tags.push(string_value(key, v)?);
                    }
                }
                "description" => description = string_value(key, value)?,
                "bug" => {
                    bug = Some(value.as_u64().ok_or_else(|| {
                        format!("`bug` must be an integer, got: {value}")
                    })?)
                }
                unknown => {
                    warn!("Skipping unknown expectation key `{unknown}`");
                }
            }
        }

        if names.is_empty() == failure.is_none() {
            return Err("Each record needs exactly one of `name`, `names` or `failure`".to_owned());
        }
        if pattern.is_some() && substring.is_some() {
            return Err("`pattern` and `substring` are mutually exclusive".to_owned());
        }

        let pattern_source = match (pattern, substring) {
            (Some(p), None) => p,
            // A substring record is the quoted form of the same thing.
            (None, Some(s)) => format!(".*{}.*", regex::escape(&s)),
            (None, None) => ".*".to_owned(),
            (Some(_), Some(_)) => unreachable!("checked above"),
        };
        let expectation = Arc::new(Expectation {
            result,
            pattern: compile_pattern(&pattern_source)?,
            tags,
            description,
            bug,
        });

        if let Some(failure_name) = failure {
            if self.failures.iter().any(|(name, _)| *name == failure_name) {
                return Err(format!("Duplicate expectation name: {failure_name}"));
            }
            self.failures.push((failure_name, expectation));
        } else {
            for name in names {
                if self.outcomes.insert(name.clone(), expectation.clone()).is_some() {
                    return Err(format!("Duplicate expectation name: {name}"));
                }
            }
        }
        Ok(())
    }

    ///
    /// Resolves the expectation for a completed outcome. Resolution order: exact name match,
    /// then the first failure record whose pattern matches the combined output, then the
    /// longest declared name prefix, then the implicit success expectation.
    ///
    pub fn get(&self, outcome: &Outcome) -> Arc<Expectation> {
        if let Some(exact) = self.outcomes.get(outcome.name()) {
            return exact.clone();
        }
        let output = outcome.combined_output();
        for (_, failure) in &self.failures {
            if failure.pattern_matches(&output) {
                return failure.clone();
            }
        }
        self.get_by_prefix(outcome.name())
    }

    ///
    /// Resolves by name alone, skipping the failure-pattern scan: used before a run, when there
    /// is no output to scan yet.
    ///
    pub fn get_by_name_or_prefix(&self, name: &str) -> Arc<Expectation> {
        if let Some(exact) = self.outcomes.get(name) {
            return exact.clone();
        }
        self.get_by_prefix(name)
    }

    fn get_by_prefix(&self, name: &str) -> Arc<Expectation> {
        let mut prefix = name;
        while let Some(end) = prefix.rfind(['.', '#']) {
            prefix = &prefix[..end];
            if let Some(expectation) = self.outcomes.get(prefix) {
                return expectation.clone();
            }
        }
        Expectation::implicit_success()
    }
}

fn string_value(key: &str, value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| format!("`{key}` must be a string, got: {value}"))
}

///
/// Failure output can span many lines, so patterns are compiled multi-line and dot-all, and must
/// match the entire combined output.
///
fn compile_pattern(source: &str) -> Result<Regex, String> {
    Regex::new(&format!(r"(?ms)\A(?:{source})\z"))
        .map_err(|e| format!("Invalid pattern `{source}`: {e}"))
}
