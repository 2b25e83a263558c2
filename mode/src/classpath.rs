// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fmt;
use std::path::{Path, PathBuf};

use itertools::Itertools;

///
/// An ordered, deduplicated sequence of classpath elements, rendered colon-joined for the VM
/// command line. Order is preserved because the VM resolves classes first-match-wins.
///
#[derive(Clone, Debug, Default)]
pub struct Classpath {
    elements: Vec<PathBuf>,
}

impl Classpath {
    pub fn new() -> Classpath {
        Classpath::default()
    }

    pub fn of(elements: impl IntoIterator<Item = PathBuf>) -> Classpath {
        let mut classpath = Classpath::new();
        classpath.extend(elements);
        classpath
    }

    pub fn add(&mut self, element: PathBuf) {
        if !self.elements.contains(&element) {
            self.elements.push(element);
        }
    }

    pub fn extend(&mut self, elements: impl IntoIterator<Item = PathBuf>) {
        for element in elements {
            self.add(element);
        }
    }

    pub fn append(&mut self, other: &Classpath) {
        self.extend(other.elements.iter().cloned());
    }

    pub fn elements(&self) -> &[PathBuf] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// All elements rebased into `dir`, for artifacts that were deployed elsewhere.
    pub fn rebased_under(&self, dir: &Path) -> Classpath {
        Classpath::of(self.elements.iter().map(|element| {
            match element.file_name() {
                Some(file_name) => dir.join(file_name),
                None => element.clone(),
            }
        }))
    }
}

impl fmt::Display for Classpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.elements.iter().map(|e| e.display()).join(":")
        )
    }
}

#[cfg(test)]
mod classpath_tests {
    use std::path::{Path, PathBuf};

    use super::Classpath;

    #[test]
    fn joins_with_colons_in_order() {
        let classpath = Classpath::of([
            PathBuf::from("/x/a.jar"),
            PathBuf::from("/x/b.jar"),
            PathBuf::from("/y/c.jar"),
        ]);
        assert_eq!(classpath.to_string(), "/x/a.jar:/x/b.jar:/y/c.jar");
    }

    #[test]
    fn deduplicates_but_keeps_first_position() {
        let mut classpath = Classpath::of([PathBuf::from("/a.jar"), PathBuf::from("/b.jar")]);
        classpath.add(PathBuf::from("/a.jar"));
        assert_eq!(classpath.to_string(), "/a.jar:/b.jar");
    }

    #[test]
    fn rebases_file_names() {
        let classpath = Classpath::of([PathBuf::from("/host/build/t.jar")]);
        assert_eq!(
            classpath.rebased_under(Path::new("/sdcard/run")).to_string(),
            "/sdcard/run/t.jar"
        );
    }
}
