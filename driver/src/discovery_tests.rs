// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use super::discover;

fn write(dir: &tempfile::TempDir, relative: &str, contents: &str) {
    let path = dir.path().join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[test]
fn class_names_become_actions_directly() {
    let discovered = discover(&["ex.AddTest#plus".to_owned(), "ex.Whole".to_owned()]);
    let names: Vec<_> = discovered.actions.iter().map(|a| a.name().to_owned()).collect();
    assert_eq!(names, ["ex.AddTest#plus", "ex.Whole"]);
    assert!(discovered.early_outcomes.is_empty());
    assert!(discovered.actions[0].source_file().is_none());
}

#[test]
fn directories_are_scanned_for_declared_types() {
    let dir = tempfile::TempDir::new().unwrap();
    write(
        &dir,
        "src/ex/AddTest.java",
        "package ex;\n\npublic class AddTest {}\n",
    );
    write(
        &dir,
        "src/ex/deep/Iface.java",
        "package ex.deep;\ninterface Iface {}\n",
    );
    // No top-level declaration: not an action.
    write(&dir, "src/ex/package-info.java", "package ex;\n");

    let root = dir.path().join("src").display().to_string();
    let discovered = discover(&[root]);
    let mut names: Vec<_> = discovered.actions.iter().map(|a| a.name().to_owned()).collect();
    names.sort();
    assert_eq!(names, ["ex.AddTest", "ex.deep.Iface"]);
    assert!(discovered.early_outcomes.is_empty());

    let add_test = discovered
        .actions
        .iter()
        .find(|a| a.name() == "ex.AddTest")
        .unwrap();
    assert!(add_test.source_file().unwrap().ends_with("ex/AddTest.java"));
    assert!(add_test.source_path().unwrap().ends_with("src"));
}

#[test]
fn default_package_uses_the_file_stem() {
    let dir = tempfile::TempDir::new().unwrap();
    write(&dir, "Solo.java", "class Solo {}\n");
    let discovered = discover(&[dir.path().join("Solo.java").display().to_string()]);
    assert_eq!(discovered.actions.len(), 1);
    assert_eq!(discovered.actions[0].name(), "Solo");
}

#[test]
fn garbage_input_becomes_an_early_error_outcome() {
    let discovered = discover(&["no/such/path.java".to_owned()]);
    assert!(discovered.actions.is_empty());
    assert_eq!(discovered.early_outcomes.len(), 1);
    let outcome = &discovered.early_outcomes[0];
    assert_eq!(outcome.result(), outcome::RunResult::Error);
    assert!(outcome.name().starts_with("javelin.invalid."));
}

#[test]
fn sibling_resources_directory_is_attached() {
    let dir = tempfile::TempDir::new().unwrap();
    write(&dir, "src/ex/T.java", "package ex;\nclass T {}\n");
    std::fs::create_dir_all(dir.path().join("src/ex/resources")).unwrap();

    let discovered = discover(&[dir.path().join("src").display().to_string()]);
    assert_eq!(discovered.actions.len(), 1);
    assert!(discovered.actions[0]
        .resources_dir()
        .unwrap()
        .ends_with("ex/resources"));
}
