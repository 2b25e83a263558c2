// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use expectation::{Expectation, ExpectationStore};
use log::warn;
use outcome::{Outcome, ResultValue};

mod xml;

///
/// An outcome enriched with everything needed to judge and explain it: the resolved
/// expectation, the chronological history of prior runs, and the tagged baseline if one is
/// being compared against.
///
pub struct AnnotatedOutcome {
    outcome: Outcome,
    expectation: Arc<Expectation>,
    // Most recent first.
    previous: Vec<Outcome>,
    tag_outcome: Option<Outcome>,
}

impl AnnotatedOutcome {
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn expectation(&self) -> &Arc<Expectation> {
        &self.expectation
    }

    pub fn previous(&self) -> &[Outcome] {
        &self.previous
    }

    pub fn tag_outcome(&self) -> Option<&Outcome> {
        self.tag_outcome.as_ref()
    }

    pub fn result_value(&self) -> ResultValue {
        self.expectation.result_value(&self.outcome)
    }

    /// True when this run behaved differently from the last recorded run, or when there is no
    /// recorded run to compare against.
    pub fn changed_since_previous(&self) -> bool {
        match self.previous.first() {
            Some(last) => !last.same_behavior_as(&self.outcome),
            None => true,
        }
    }

    pub fn changed_since_tag(&self) -> bool {
        match &self.tag_outcome {
            Some(tag) => !tag.same_behavior_as(&self.outcome),
            None => false,
        }
    }

    /// Whether the summary should call this outcome out: something about it is news.
    pub fn is_noteworthy(&self) -> bool {
        self.changed_since_previous() || self.changed_since_tag()
    }
}

///
/// Persists outcomes for two purposes: automatic per-outcome history, used to tell whether a
/// test's behavior changed, and named tag snapshots, used as a fixed baseline to diff a whole
/// run against.
///
pub struct OutcomeStore {
    results_dir: PathBuf,
    tag_dir: Option<PathBuf>,
    write_tag: Option<String>,
    compare_tag: Option<String>,
    expectations: Arc<ExpectationStore>,
}

impl OutcomeStore {
    pub fn new(
        results_dir: PathBuf,
        tag_dir: Option<PathBuf>,
        write_tag: Option<String>,
        compare_tag: Option<String>,
        expectations: Arc<ExpectationStore>,
    ) -> OutcomeStore {
        OutcomeStore {
            results_dir,
            tag_dir,
            write_tag,
            compare_tag,
            expectations,
        }
    }

    fn history_dir(&self, outcome_name: &str) -> PathBuf {
        let mut dir = self.results_dir.join("auto");
        for component in action::name_path_components(outcome_name) {
            dir.push(component);
        }
        dir
    }

    fn tag_file(&self, tag: &str, outcome_name: &str) -> Option<PathBuf> {
        let mut path = self.tag_dir.clone()?.join("results").join(tag);
        for component in action::name_path_components(outcome_name) {
            path.push(component);
        }
        path.push("canonical.xml");
        Some(path)
    }

    ///
    /// Annotates a just-completed outcome with its history, its tagged baseline and its resolved
    /// expectation. History files that fail to parse are skipped with a warning: a corrupt old
    /// record should cost the diff, not the run.
    ///
    pub fn read(&self, outcome: Outcome) -> AnnotatedOutcome {
        let mut previous: Vec<(DateTime<Utc>, Outcome)> = Vec::new();
        let dir = self.history_dir(outcome.name());
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(timestamp) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(".xml"))
                    .and_then(xml::parse_timestamp)
                else {
                    continue;
                };
                match read_outcome_file(&path) {
                    Ok(prior) => previous.push((timestamp, prior)),
                    Err(e) => warn!("Skipping unreadable history entry: {e}"),
                }
            }
        }
        previous.sort_by(|(a, _), (b, _)| b.cmp(a));

        let tag_outcome = self
            .compare_tag
            .as_ref()
            .and_then(|tag| self.tag_file(tag, outcome.name()))
            .filter(|path| path.exists())
            .and_then(|path| match read_outcome_file(&path) {
                Ok(tagged) => Some(tagged),
                Err(e) => {
                    warn!("Skipping unreadable tag entry: {e}");
                    None
                }
            });

        let expectation = self.expectations.get(&outcome);
        AnnotatedOutcome {
            expectation,
            previous: previous.into_iter().map(|(_, outcome)| outcome).collect(),
            tag_outcome,
            outcome,
        }
    }

    ///
    /// Records a completed outcome. A new timestamped history file is written only when the
    /// outcome `changed` (or has no history at all); unchanged runs instead append a line to the
    /// `.meta` sidecar pointing at the file that already records this behavior, so stable tests
    /// do not accrete identical files. The canonical tag file, when a tag is being written, is
    /// always replaced.
    ///
    pub fn write(&self, outcome: &Outcome, changed: bool) -> Result<(), String> {
        let dir = self.history_dir(outcome.name());
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;

        let timestamp = outcome.completed_at().format(xml::TIMESTAMP_FORMAT).to_string();
        let latest = latest_history_file(&dir);
        let recorded_in = if changed || latest.is_none() {
            let file_name = format!("{timestamp}.xml");
            write_outcome_file(&dir.join(&file_name), outcome)?;
            file_name
        } else {
            latest.unwrap()
        };

        let meta = dir.join(".meta");
        let line = format!("{timestamp} {recorded_in}\n");
        append(&meta, &line)?;

        if let Some(tag) = &self.write_tag {
            let path = self
                .tag_file(tag, outcome.name())
                .ok_or_else(|| "A tag was given but no tag directory is configured".to_owned())?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
            }
            write_outcome_file(&path, outcome)?;
        }
        Ok(())
    }
}

fn latest_history_file(dir: &Path) -> Option<String> {
    let mut newest: Option<(DateTime<Utc>, String)> = None;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(timestamp) = name.strip_suffix(".xml").and_then(xml::parse_timestamp) else {
            continue;
        };
        if newest.as_ref().map(|(t, _)| timestamp > *t).unwrap_or(true) {
            newest = Some((timestamp, name));
        }
    }
    newest.map(|(_, name)| name)
}

fn append(path: &Path, line: &str) -> Result<(), String> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    file.write_all(line.as_bytes())
        .map_err(|e| format!("Failed to append to {}: {e}", path.display()))
}

fn read_outcome_file(path: &Path) -> Result<Outcome, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    xml::decode(&contents, path)
}

fn write_outcome_file(path: &Path, outcome: &Outcome) -> Result<(), String> {
    let encoded = xml::encode(outcome)?;
    std::fs::write(path, encoded).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests;
