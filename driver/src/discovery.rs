// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Turns the caller's words into Actions: a qualified class name runs as-is (it is expected on
//! the classpath), while a file or directory is scanned for Java sources whose top-level
//! declaration names the action.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use action::Action;
use log::debug;
use outcome::{Outcome, RunResult};
use regex::Regex;
use walkdir::WalkDir;

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*package\s+([A-Za-z_$][A-Za-z0-9_$.]*)\s*;").unwrap()
});
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:public\s+|final\s+|abstract\s+|strictfp\s+)*(?:class|interface|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .unwrap()
});

pub struct Discovered {
    pub actions: Vec<Arc<Action>>,
    /// Outcomes already decided during discovery (unreadable or unidentifiable inputs).
    pub early_outcomes: Vec<Outcome>,
}

pub fn discover(inputs: &[String]) -> Discovered {
    let mut discovered = Discovered {
        actions: Vec::new(),
        early_outcomes: Vec::new(),
    };
    for input in inputs {
        let path = Path::new(input);
        if path.exists() {
            discover_path(path, &mut discovered);
        } else {
            match Action::new(input) {
                Ok(action) => discovered.actions.push(Arc::new(action)),
                Err(e) => discovered.early_outcomes.push(Outcome::from_text(
                    &sanitize_name(input),
                    RunResult::Error,
                    &format!("No such file, and not a class name either: {e}"),
                )),
            }
        }
    }
    discovered
}

fn discover_path(path: &Path, discovered: &mut Discovered) {
    if path.is_file() {
        let root = path.parent().unwrap_or(Path::new(".")).to_owned();
        consider_source(path, &root, discovered);
        return;
    }
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                discovered.early_outcomes.push(Outcome::from_text(
                    &sanitize_name(&path.display().to_string()),
                    RunResult::Error,
                    &format!("Failed to walk {}: {e}", path.display()),
                ));
                continue;
            }
        };
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "java")
        {
            consider_source(entry.path(), path, discovered);
        }
    }
}

fn consider_source(source: &Path, root: &Path, discovered: &mut Discovered) {
    let contents = match std::fs::read_to_string(source) {
        Ok(contents) => contents,
        Err(e) => {
            discovered.early_outcomes.push(Outcome::from_text(
                &sanitize_name(&source.display().to_string()),
                RunResult::Error,
                &format!("Failed to read {}: {e}", source.display()),
            ));
            return;
        }
    };

    // Only files with a recognised top-level declaration are actions; package-info.java and
    // the like are not.
    if !TYPE_RE.is_match(&contents) {
        debug!("{} has no top-level declaration; skipping", source.display());
        return;
    }
    let Some(stem) = source.file_stem().and_then(|s| s.to_str()) else {
        return;
    };
    let package = PACKAGE_RE
        .captures(&contents)
        .map(|captures| captures[1].to_owned());
    let name = match &package {
        Some(package) => format!("{package}.{stem}"),
        None => stem.to_owned(),
    };

    match Action::new(&name) {
        Ok(action) => {
            let action = action
                .with_source_file(source.to_owned())
                .with_source_path(root.to_owned());
            let resources = source.parent().map(|dir| dir.join("resources"));
            let action = match resources.filter(|dir| dir.is_dir()) {
                Some(resources) => action.with_resources_dir(resources),
                None => action,
            };
            discovered.actions.push(Arc::new(action));
        }
        Err(e) => discovered.early_outcomes.push(Outcome::from_text(
            &sanitize_name(&name),
            RunResult::Error,
            &format!("Source {} yields an invalid action name: {e}", source.display()),
        )),
    }
}

/// Outcome names must be name-shaped even when describing garbage input.
fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("javelin.invalid.{}", if cleaned.is_empty() { "input".to_owned() } else { cleaned })
}
