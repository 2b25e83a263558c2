// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;

use super::{name_path_components, Action};

#[test]
fn class_and_method_split() {
    let action = Action::new("ex.AddTest#plus").unwrap();
    assert_eq!(action.name(), "ex.AddTest#plus");
    assert_eq!(action.class_name(), "ex.AddTest");
    assert_eq!(action.method_name(), Some("plus"));

    let whole_class = Action::new("ex.AddTest").unwrap();
    assert_eq!(whole_class.class_name(), "ex.AddTest");
    assert_eq!(whole_class.method_name(), None);
}

#[test]
fn rejects_malformed_names() {
    Action::new("").expect_err("empty");
    Action::new("a..b").expect_err("empty segment");
    Action::new("a.b#m#n").expect_err("multiple selectors");
    Action::new("1abc.Test").expect_err("leading digit");
    Action::new("a.b-c").expect_err("dash");
}

#[test]
fn user_dir_set_once() {
    let action = Action::new("ex.Once").unwrap();
    assert_eq!(action.user_dir(), None);
    action.set_user_dir(PathBuf::from("/tmp/ex.Once")).unwrap();
    assert_eq!(action.user_dir(), Some(std::path::Path::new("/tmp/ex.Once")));
    action
        .set_user_dir(PathBuf::from("/tmp/elsewhere"))
        .expect_err("second assignment must fail");
    // And the original assignment is untouched.
    assert_eq!(action.user_dir(), Some(std::path::Path::new("/tmp/ex.Once")));
}

#[test]
fn file_name_flattens_selector() {
    let action = Action::new("ex.AddTest#plus").unwrap();
    assert_eq!(action.file_name(), "ex.AddTest_plus");
}

#[test]
fn path_components() {
    assert_eq!(name_path_components("a.b.C#m"), vec!["a", "b", "C", "m"]);
    assert_eq!(name_path_components("Single"), vec!["Single"]);
}
