// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::time::Duration;

use outcome::{Outcome, RunResult};

use super::{Handler, HostMonitor};

#[derive(Default)]
struct RecordingHandler {
    events: Vec<String>,
    outcomes: Vec<Outcome>,
}

impl Handler for RecordingHandler {
    fn start(&mut self, outcome_name: &str, runner_tag: &str) {
        self.events.push(format!("start {outcome_name} [{runner_tag}]"));
    }

    fn output(&mut self, outcome_name: &str, fragment: &str) {
        self.events.push(format!("output {outcome_name} {fragment:?}"));
    }

    fn finish(&mut self, outcome: &Outcome) {
        self.events
            .push(format!("finish {} {}", outcome.name(), outcome.result()));
        self.outcomes.push(outcome.clone());
    }

    fn print(&mut self, text: &str) {
        self.events.push(format!("print {text:?}"));
    }
}

fn monitor() -> HostMonitor {
    HostMonitor::new(Duration::from_secs(5))
}

#[tokio::test]
async fn decodes_a_complete_stream() {
    let stream = concat!(
        r#"<javelin-monitor>"#,
        r#"<outcome name="ex.AddTest#plus" runner="javelin.target.junit.JUnitRunner">"#,
        "computing...\n",
        r#"<result value="SUCCESS"/>"#,
        r#"</outcome>"#,
        r#"</javelin-monitor>"#,
    );
    let mut handler = RecordingHandler::default();
    let completed = monitor()
        .monitor_stream(stream.as_bytes(), &mut handler)
        .await;

    assert!(completed);
    assert_eq!(
        handler.events,
        vec![
            "start ex.AddTest#plus [javelin.target.junit.JUnitRunner]",
            "output ex.AddTest#plus \"computing...\\n\"",
            "finish ex.AddTest#plus SUCCESS",
        ]
    );
    assert_eq!(handler.outcomes[0].result(), RunResult::Success);
    assert_eq!(handler.outcomes[0].output_lines(), ["computing...", ""]);
}

#[tokio::test]
async fn fragments_concatenate_in_arrival_order() {
    let stream = concat!(
        r#"<javelin-monitor>"#,
        r#"<outcome name="ex.T#m" runner="r">"#,
        "first ",
        r#"<!-- runners flush mid-line -->"#,
        "second ",
        r#"<!-- and again -->"#,
        "third",
        r#"<result value="EXEC_FAILED"/>"#,
        r#"</outcome>"#,
        r#"</javelin-monitor>"#,
    );
    let mut handler = RecordingHandler::default();
    assert!(
        monitor()
            .monitor_stream(stream.as_bytes(), &mut handler)
            .await
    );
    assert_eq!(
        handler.outcomes[0].output_lines(),
        ["first second third"]
    );
    let fragments: Vec<_> = handler
        .events
        .iter()
        .filter(|e| e.starts_with("output"))
        .collect();
    assert_eq!(fragments.len(), 3);
}

#[tokio::test]
async fn unstructured_output_is_printed_not_recorded() {
    let stream = concat!(
        r#"<javelin-monitor>"#,
        r#"<outcome name="ex.T#a" runner="r">"#,
        r#"<result value="SUCCESS"/>"#,
        r#"</outcome>"#,
        r#"<unstructured-output>vm warning: something</unstructured-output>"#,
        r#"<outcome name="ex.T#b" runner="r">"#,
        r#"<result value="SUCCESS"/>"#,
        r#"</outcome>"#,
        r#"</javelin-monitor>"#,
    );
    let mut handler = RecordingHandler::default();
    assert!(
        monitor()
            .monitor_stream(stream.as_bytes(), &mut handler)
            .await
    );
    assert_eq!(
        handler.events,
        vec![
            "start ex.T#a [r]",
            "finish ex.T#a SUCCESS",
            "print \"vm warning: something\"",
            "start ex.T#b [r]",
            "finish ex.T#b SUCCESS",
        ]
    );
}

#[tokio::test]
async fn finish_precedes_the_next_start() {
    let stream = concat!(
        r#"<javelin-monitor>"#,
        r#"<outcome name="ex.T#a" runner="r"><result value="SUCCESS"/></outcome>"#,
        r#"<outcome name="ex.T#b" runner="r"><result value="EXEC_FAILED"/></outcome>"#,
        r#"</javelin-monitor>"#,
    );
    let mut handler = RecordingHandler::default();
    assert!(
        monitor()
            .monitor_stream(stream.as_bytes(), &mut handler)
            .await
    );
    let positions: Vec<_> = handler
        .events
        .iter()
        .map(|e| e.split(' ').next().unwrap().to_owned())
        .collect();
    assert_eq!(positions, ["start", "finish", "start", "finish"]);
}

#[tokio::test]
async fn truncated_stream_does_not_complete_normally() {
    // The runner died after starting an outcome: no result, no closing tags.
    let stream = concat!(
        r#"<javelin-monitor>"#,
        r#"<outcome name="ex.Suite#b" runner="r">"#,
        "partial output",
    );
    let mut handler = RecordingHandler::default();
    let completed = monitor()
        .monitor_stream(stream.as_bytes(), &mut handler)
        .await;
    assert!(!completed);
    // The start was still observed, so a resume can skip past it.
    assert_eq!(handler.events[0], "start ex.Suite#b [r]");
    assert!(handler.outcomes.is_empty());
}

#[tokio::test]
async fn malformed_xml_is_nonfatal() {
    let stream = r#"<javelin-monitor><outcome name="ex.T" runner="r"></wrong></javelin-monitor>"#;
    let mut handler = RecordingHandler::default();
    let completed = monitor()
        .monitor_stream(stream.as_bytes(), &mut handler)
        .await;
    assert!(!completed);
}

#[tokio::test]
async fn connect_gives_up_after_the_monitor_timeout() {
    let monitor = HostMonitor::new(Duration::from_millis(10));
    let mut handler = RecordingHandler::default();
    // Nothing listens on this port; the connect loop must give up, not spin forever.
    let completed = monitor.monitor_socket(1, &mut handler).await;
    assert!(!completed);
    assert!(handler.events.is_empty());
}
