// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

///
/// A compilable, runnable unit: typically one test class, optionally narrowed to a single method
/// with a `#method` selector.
///
/// Actions are created during discovery and immutable afterwards, with one exception: the working
/// directory is derived and assigned exactly once while the run is being prepared.
///
#[derive(Debug)]
pub struct Action {
    name: String,
    source_file: Option<PathBuf>,
    source_path: Option<PathBuf>,
    resources_dir: Option<PathBuf>,
    user_dir: OnceLock<PathBuf>,
}

impl Action {
    ///
    /// Creates an Action for a qualified name such as `ex.AddTest` or `ex.AddTest#plus`.
    ///
    /// Names are dot separated, with an optional single `#` selecting one method; each segment
    /// must be a plausible identifier.
    ///
    pub fn new(name: &str) -> Result<Action, String> {
        validate_name(name)?;
        Ok(Action {
            name: name.to_owned(),
            source_file: None,
            source_path: None,
            resources_dir: None,
            user_dir: OnceLock::new(),
        })
    }

    pub fn with_source_file(mut self, source_file: PathBuf) -> Action {
        self.source_file = Some(source_file);
        self
    }

    pub fn with_source_path(mut self, source_path: PathBuf) -> Action {
        self.source_path = Some(source_path);
        self
    }

    pub fn with_resources_dir(mut self, resources_dir: PathBuf) -> Action {
        self.resources_dir = Some(resources_dir);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class portion of the name: everything before the `#` selector, if there is one.
    pub fn class_name(&self) -> &str {
        match self.name.split_once('#') {
            Some((class, _)) => class,
            None => &self.name,
        }
    }

    /// The `#method` selector, if the action names a single method.
    pub fn method_name(&self) -> Option<&str> {
        self.name.split_once('#').map(|(_, method)| method)
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn resources_dir(&self) -> Option<&Path> {
        self.resources_dir.as_deref()
    }

    ///
    /// Assigns the working directory for this action. May be called at most once, during run
    /// preparation; later calls fail rather than silently moving the action.
    ///
    pub fn set_user_dir(&self, dir: PathBuf) -> Result<(), String> {
        self.user_dir
            .set(dir)
            .map_err(|dir| format!("Working directory for {} already set: {}", self.name, dir.display()))
    }

    /// The working directory assigned during preparation.
    pub fn user_dir(&self) -> Option<&Path> {
        self.user_dir.get().map(PathBuf::as_path)
    }

    ///
    /// The filesystem-safe form of this action's name, used for per-action scratch and artifact
    /// paths: the `#` selector joins the class name with an underscore.
    ///
    pub fn file_name(&self) -> String {
        self.name.replace('#', "_")
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

///
/// Splits a qualified outcome or action name into filesystem path components: dots and the `#`
/// selector both become separators, so `a.b.C#m` stores under `a/b/C/m`.
///
pub fn name_path_components(name: &str) -> Vec<&str> {
    name.split(['.', '#']).filter(|s| !s.is_empty()).collect()
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Action names must be non-empty".to_owned());
    }
    if name.matches('#').count() > 1 {
        return Err(format!("Invalid action name (multiple `#` selectors): {name}"));
    }
    for segment in name.split(['.', '#']) {
        if segment.is_empty() {
            return Err(format!("Invalid action name (empty segment): {name}"));
        }
        let mut chars = segment.chars();
        let first = chars.next().unwrap();
        if !(first.is_alphabetic() || first == '_' || first == '$') {
            return Err(format!("Invalid action name segment `{segment}`: {name}"));
        }
        if !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            return Err(format!("Invalid action name segment `{segment}`: {name}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
