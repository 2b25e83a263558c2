// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action::Action;
use async_trait::async_trait;
use expectation::ExpectationStore;
use mode::{Mode, Variant};
use outcome::{Outcome, ResultValue, RunResult};
use outcome_store::OutcomeStore;
use parking_lot::Mutex;

use crate::console::Console;
use crate::discovery::Discovered;
use crate::driver::{Driver, RunConfig};

///
/// A mode whose "target process" is a shell script emitting the wire protocol, so whole runs
/// can be exercised without a JDK: build is instant, run is /bin/sh.
///
#[derive(Default)]
struct ScriptMode {
    // Keyed by (action name, skip_past cursor), so resume attempts get their own script.
    scripts: HashMap<(String, Option<String>), String>,
    build_failures: HashMap<String, Outcome>,
    built: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
}

impl ScriptMode {
    fn script(&mut self, action: &str, skip_past: Option<&str>, script: &str) {
        self.scripts.insert(
            (action.to_owned(), skip_past.map(str::to_owned)),
            script.to_owned(),
        );
    }
}

#[async_trait]
impl Mode for ScriptMode {
    async fn prepare(&self) -> Result<(), String> {
        Ok(())
    }

    async fn build_and_install(&self, action: &Action) -> Option<Outcome> {
        self.built.lock().push(action.name().to_owned());
        self.build_failures.get(action.name()).cloned()
    }

    fn create_action_command(
        &self,
        action: &Action,
        skip_past: Option<&str>,
        _monitor_port: Option<u16>,
    ) -> Vec<String> {
        let key = (action.name().to_owned(), skip_past.map(str::to_owned));
        match self.scripts.get(&key) {
            Some(script) => vec!["/bin/sh".to_owned(), "-c".to_owned(), script.clone()],
            // An unknown cursor: exit silently, which reads as a crash with no progress.
            None => vec!["/bin/sh".to_owned(), "-c".to_owned(), "exit 0".to_owned()],
        }
    }

    async fn cleanup(&self, action: &Action) -> Result<(), String> {
        self.cleaned.lock().push(action.name().to_owned());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), String> {
        Ok(())
    }

    fn use_socket_monitor(&self) -> bool {
        false
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    mode: ScriptMode,
    expectations: &'static str,
    timeout: Duration,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture {
            dir: tempfile::TempDir::new().unwrap(),
            mode: ScriptMode::default(),
            expectations: "[]",
            timeout: Duration::ZERO,
        }
    }

    async fn run(self, inputs: &[&str]) -> RunOutput {
        let expectation_file = self.dir.path().join("expectations.json");
        std::fs::write(&expectation_file, self.expectations).unwrap();
        let expectations = Arc::new(ExpectationStore::parse(&[expectation_file]).unwrap());

        let store = Arc::new(OutcomeStore::new(
            self.dir.path().join("results"),
            None,
            None,
            None,
            expectations.clone(),
        ));
        let config = RunConfig {
            variant: Variant::HostJvm,
            action_timeout: self.timeout,
            monitor_timeout: Duration::from_secs(5),
            first_monitor_port: 8788,
            stream: true,
            benchmark: false,
            debug: false,
            keep_after: false,
            local_tmp: self.dir.path().join("tmp"),
        };
        let mode = Arc::new(self.mode);
        let driver = Driver::new(
            config,
            mode.clone(),
            expectations,
            store,
            Arc::new(Console::new(true, false)),
        );

        let discovered = Discovered {
            actions: inputs
                .iter()
                .map(|name| Arc::new(Action::new(name).unwrap()))
                .collect(),
            early_outcomes: Vec::new(),
        };
        let code = driver.run(discovered).await;
        RunOutput {
            code,
            driver,
            mode,
            dir: self.dir,
        }
    }
}

struct RunOutput {
    code: i32,
    driver: Arc<Driver>,
    mode: Arc<ScriptMode>,
    dir: tempfile::TempDir,
}

fn wire(body: &str) -> String {
    format!("printf '%s' '<javelin-monitor>{body}</javelin-monitor>'")
}

#[tokio::test]
async fn happy_path_records_success_and_exits_zero() {
    let mut fixture = Fixture::new();
    fixture.mode.script(
        "ex.AddTest#plus",
        None,
        &wire(concat!(
            r#"<outcome name="ex.AddTest#plus" runner="r">2 + 2 = 4"#,
            r#"<result value="SUCCESS"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.AddTest#plus"]).await;

    assert_eq!(run.code, 0);
    assert_eq!(
        run.driver.recorded_values(),
        vec![("ex.AddTest#plus".to_owned(), ResultValue::Ok)]
    );
    assert_eq!(*run.mode.built.lock(), vec!["ex.AddTest#plus"]);
    assert_eq!(*run.mode.cleaned.lock(), vec!["ex.AddTest#plus"]);
}

#[tokio::test]
async fn happy_path_writes_history() {
    let mut fixture = Fixture::new();
    fixture.mode.script(
        "ex.AddTest#plus",
        None,
        &wire(concat!(
            r#"<outcome name="ex.AddTest#plus" runner="r">"#,
            r#"<result value="SUCCESS"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.AddTest#plus"]).await;
    assert_eq!(run.code, 0);

    let history_dir = run.dir.path().join("results/auto/ex/AddTest/plus");
    let xml_files = std::fs::read_dir(&history_dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".xml"))
        .count();
    assert_eq!(xml_files, 1);
}

#[tokio::test]
async fn declared_unsupported_is_short_circuited() {
    let mut fixture = Fixture::new();
    fixture.expectations = r#"[{"name": "ex.Skip", "result": "UNSUPPORTED"}]"#;
    fixture.mode.script(
        "ex.Other",
        None,
        &wire(concat!(
            r#"<outcome name="ex.Other" runner="r">"#,
            r#"<result value="SUCCESS"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.Skip", "ex.Other"]).await;

    assert_eq!(run.code, 0);
    // No build, no install, no run for the unsupported action.
    assert_eq!(*run.mode.built.lock(), vec!["ex.Other"]);
    assert_eq!(
        run.driver.recorded_values(),
        vec![
            ("ex.Other".to_owned(), ResultValue::Ok),
            ("ex.Skip".to_owned(), ResultValue::Ignore),
        ]
    );
}

#[tokio::test]
async fn build_failure_is_recorded_and_run_continues() {
    let mut fixture = Fixture::new();
    fixture.mode.build_failures.insert(
        "ex.Broken".to_owned(),
        Outcome::from_text(
            "ex.Broken",
            RunResult::CompileFailed,
            "Broken.java:1: error: ';' expected",
        ),
    );
    fixture.mode.script(
        "ex.Fine",
        None,
        &wire(concat!(
            r#"<outcome name="ex.Fine" runner="r">"#,
            r#"<result value="SUCCESS"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.Broken", "ex.Fine"]).await;

    assert_eq!(run.code, 1);
    assert_eq!(
        run.driver.recorded_values(),
        vec![
            ("ex.Broken".to_owned(), ResultValue::Fail),
            ("ex.Fine".to_owned(), ResultValue::Ok),
        ]
    );
    // Scratch is cleaned for the broken action too.
    let mut cleaned = run.mode.cleaned.lock().clone();
    cleaned.sort();
    assert_eq!(cleaned, vec!["ex.Broken", "ex.Fine"]);
}

#[tokio::test]
async fn timeout_kills_the_action_but_not_the_run() {
    let mut fixture = Fixture::new();
    fixture.timeout = Duration::from_secs(1);
    // Starts an outcome, then never finishes it.
    fixture.mode.script(
        "ex.Slow",
        None,
        r#"printf '%s' '<javelin-monitor><outcome name="ex.Slow#a" runner="r">'; sleep 60"#,
    );
    fixture.mode.script(
        "ex.Fast",
        None,
        &wire(concat!(
            r#"<outcome name="ex.Fast" runner="r">"#,
            r#"<result value="SUCCESS"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.Slow", "ex.Fast"]).await;

    assert_eq!(run.code, 1);
    assert_eq!(
        run.driver.recorded_values(),
        vec![
            ("ex.Fast".to_owned(), ResultValue::Ok),
            ("ex.Slow#a".to_owned(), ResultValue::Fail),
        ]
    );
}

#[tokio::test]
async fn crash_resumes_past_the_last_started_outcome() {
    let mut fixture = Fixture::new();
    // First attempt: finishes #a, starts #b, then the process dies.
    fixture.mode.script(
        "ex.Suite",
        None,
        concat!(
            "printf '%s' '<javelin-monitor>",
            r#"<outcome name="ex.Suite#a" runner="r"><result value="SUCCESS"/></outcome>"#,
            r#"<outcome name="ex.Suite#b" runner="r">partial"#,
            "'",
        ),
    );
    // The relaunch is told to resume past #b and completes the suite.
    fixture.mode.script(
        "ex.Suite",
        Some("ex.Suite#b"),
        &wire(concat!(
            r#"<outcome name="ex.Suite#b" runner="r"><result value="SUCCESS"/></outcome>"#,
            r#"<outcome name="ex.Suite#c" runner="r"><result value="SUCCESS"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.Suite"]).await;

    assert_eq!(run.code, 0);
    assert_eq!(
        run.driver.recorded_values(),
        vec![
            ("ex.Suite#a".to_owned(), ResultValue::Ok),
            ("ex.Suite#b".to_owned(), ResultValue::Ok),
            ("ex.Suite#c".to_owned(), ResultValue::Ok),
        ]
    );
}

#[tokio::test]
async fn a_relaunch_that_makes_no_progress_gives_up_with_error() {
    let mut fixture = Fixture::new();
    // Dies immediately after starting #a, on every attempt.
    let dying = concat!(
        "printf '%s' '<javelin-monitor>",
        r#"<outcome name="ex.Loop#a" runner="r">"#,
        "'",
    );
    fixture.mode.script("ex.Loop", None, dying);
    fixture.mode.script("ex.Loop", Some("ex.Loop#a"), dying);
    let run = fixture.run(&["ex.Loop"]).await;

    assert_eq!(run.code, 1);
    let values = run.driver.recorded_values();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].0, "ex.Loop");
    assert_eq!(values[0].1, ResultValue::Fail);
}

#[tokio::test]
async fn known_failure_counts_as_skipped() {
    let mut fixture = Fixture::new();
    fixture.expectations = r#"[{
        "failure": "ex.Net#tls",
        "pattern": ".*SocketException.*",
        "result": "EXEC_FAILED"
    }]"#;
    fixture.mode.script(
        "ex.Net",
        None,
        &wire(concat!(
            r#"<outcome name="ex.Net#tls" runner="r">java.net.SocketException: reset"#,
            r#"<result value="EXEC_FAILED"/></outcome>"#,
        )),
    );
    let run = fixture.run(&["ex.Net"]).await;

    assert_eq!(run.code, 0);
    assert_eq!(
        run.driver.recorded_values(),
        vec![("ex.Net#tls".to_owned(), ResultValue::Ignore)]
    );
}
