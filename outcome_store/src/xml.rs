// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The on-disk form of a single recorded outcome.
//!
//! Deliberately written without indentation: text inside `<line>` elements is then exactly the
//! output that was observed, with no whitespace introduced or trimmed on the way back in.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use outcome::{sanitize_xml_text, Outcome, RunResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub(crate) fn encode(outcome: &Outcome) -> Result<String, String> {
    let mut writer = Writer::new(Vec::new());

    let mut root = BytesStart::new("outcome");
    root.push_attribute(("name", outcome.name()));
    root.push_attribute(("result", outcome.result().to_string().as_str()));
    root.push_attribute((
        "date",
        outcome
            .completed_at()
            .format(TIMESTAMP_FORMAT)
            .to_string()
            .as_str(),
    ));

    fn emitted<E: std::fmt::Display>(result: Result<(), E>, name: &str) -> Result<(), String> {
        result.map_err(|e| format!("Failed to encode outcome {name}: {e}"))
    }
    let name = outcome.name();
    emitted(
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))),
        name,
    )?;
    emitted(writer.write_event(Event::Start(root)), name)?;
    for line in outcome.output_lines() {
        emitted(writer.write_event(Event::Start(BytesStart::new("line"))), name)?;
        emitted(
            writer.write_event(Event::Text(BytesText::new(&sanitize_xml_text(line)))),
            name,
        )?;
        emitted(writer.write_event(Event::End(BytesEnd::new("line"))), name)?;
    }
    emitted(writer.write_event(Event::End(BytesEnd::new("outcome"))), name)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| format!("Encoded outcome was not UTF-8: {e}"))
}

pub(crate) fn decode(contents: &str, origin: &Path) -> Result<Outcome, String> {
    let malformed = |e: &dyn std::fmt::Display| {
        format!("Malformed outcome file {}: {e}", origin.display())
    };
    let mut reader = Reader::from_str(contents);

    let mut name: Option<String> = None;
    let mut result: Option<RunResult> = None;
    let mut completed_at: Option<DateTime<Utc>> = None;
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<String> = None;

    loop {
        match reader.read_event().map_err(|e| malformed(&e))? {
            Event::Start(element) => match element.name().as_ref() {
                b"outcome" => {
                    for attribute in element.attributes() {
                        let attribute = attribute.map_err(|e| malformed(&e))?;
                        let value = attribute
                            .unescape_value()
                            .map_err(|e| malformed(&e))?
                            .into_owned();
                        match attribute.key.as_ref() {
                            b"name" => name = Some(value),
                            b"result" => {
                                result = Some(RunResult::from_str(&value).map_err(|_| {
                                    format!("Unknown result `{value}` in {}", origin.display())
                                })?)
                            }
                            b"date" => {
                                completed_at = Some(parse_timestamp(&value).ok_or_else(|| {
                                    format!("Unparseable date `{value}` in {}", origin.display())
                                })?)
                            }
                            _ => {}
                        }
                    }
                }
                b"line" => current_line = Some(String::new()),
                _ => {}
            },
            Event::Text(text) => {
                if let Some(line) = current_line.as_mut() {
                    line.push_str(&text.unescape().map_err(|e| malformed(&e))?);
                }
            }
            Event::End(element) => {
                if element.name().as_ref() == b"line" {
                    lines.push(current_line.take().unwrap_or_default());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let name = name.ok_or_else(|| format!("Missing outcome name in {}", origin.display()))?;
    let result =
        result.ok_or_else(|| format!("Missing outcome result in {}", origin.display()))?;
    let completed_at =
        completed_at.ok_or_else(|| format!("Missing outcome date in {}", origin.display()))?;
    Ok(Outcome::recorded_at(&name, result, lines, completed_at))
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
