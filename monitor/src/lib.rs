// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use outcome::{Outcome, RunResult};
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::io::{AsyncBufRead, AsyncRead, BufReader};
use tokio::net::TcpStream;

/// Root element of the event stream the in-target runner emits.
const ROOT_ELEMENT: &[u8] = b"javelin-monitor";

/// How much of a malformed stream to keep for diagnostics.
const SNIPPET_LIMIT: usize = 1024;

///
/// Receives the decoded event stream. `output` may fire many times for one outcome; fragments
/// arrive in wire order and concatenating them yields the outcome's full output. `finish` is
/// always called before the next `start`. `print` carries unstructured output interleaved
/// between outcomes.
///
pub trait Handler: Send {
    fn start(&mut self, outcome_name: &str, runner_tag: &str);

    fn output(&mut self, outcome_name: &str, fragment: &str);

    fn finish(&mut self, outcome: &Outcome);

    fn print(&mut self, text: &str);
}

///
/// Consumes the XML event stream emitted by the in-target runner and dispatches it to a
/// `Handler`. Two transports exist: a TCP connection to the (possibly port-forwarded) runner,
/// and the runner's own standard output.
///
pub struct HostMonitor {
    monitor_timeout: Duration,
}

impl HostMonitor {
    pub fn new(monitor_timeout: Duration) -> HostMonitor {
        HostMonitor { monitor_timeout }
    }

    ///
    /// Connects to the runner's monitor port and consumes the stream. Returns true when the
    /// stream ended with the runner's closing tag; false means the runner died mid-stream (or
    /// never became reachable) and the caller should consider resuming.
    ///
    pub async fn monitor_socket(&self, port: u16, handler: &mut dyn Handler) -> bool {
        let stream = match self.connect(port).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{e}");
                return false;
            }
        };
        consume(BufReader::new(stream), handler).await
    }

    /// Consumes the stream from the runner's standard output.
    pub async fn monitor_stream<R>(&self, stream: R, handler: &mut dyn Handler) -> bool
    where
        R: AsyncRead + Unpin + Send,
    {
        consume(BufReader::new(stream), handler).await
    }

    ///
    /// Attempts to connect about once a second until the monitor timeout elapses. A successful
    /// TCP connect is not enough: a broken port forwarder happily accepts connections to
    /// nothing, so each connection is probed by peeking one byte before it is trusted.
    ///
    async fn connect(&self, port: u16) -> Result<TcpStream, String> {
        let deadline = tokio::time::Instant::now() + self.monitor_timeout;
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            if let Ok(stream) = TcpStream::connect(("localhost", port)).await {
                let mut probe = [0_u8; 1];
                match tokio::time::timeout(Duration::from_secs(1), stream.peek(&mut probe)).await
                {
                    Ok(Ok(n)) if n > 0 => {
                        debug!("monitor connected to port {port} after {attempts} attempt(s)");
                        return Ok(stream);
                    }
                    // Accepted but dead, or nothing arrived: treat as not yet up.
                    _ => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "Failed to connect to monitor port {port} within {}s",
                    self.monitor_timeout.as_secs()
                ));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

struct CurrentOutcome {
    name: String,
    result: Option<RunResult>,
    text: String,
}

async fn consume<R>(reader: R, handler: &mut dyn Handler) -> bool
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut reader = Reader::from_reader(reader);
    let mut buf: Vec<u8> = Vec::new();
    let mut recent: Vec<u8> = Vec::new();

    let mut current: Option<CurrentOutcome> = None;
    let mut in_unstructured = false;
    let mut completed_normally = false;

    loop {
        buf.clear();
        let read_result = reader.read_event_into_async(&mut buf).await;
        let event = match read_result {
            Ok(event) => event,
            Err(e) => {
                remember(&mut recent, &buf);
                warn!(
                    "Monitor stream did not parse ({e}); trailing bytes: {:?}",
                    String::from_utf8_lossy(&recent)
                );
                return false;
            }
        };

        match event {
            Event::Start(element) => match element.name().as_ref() {
                name if name == ROOT_ELEMENT => {}
                b"outcome" => {
                    let name = attribute(&element, "name").unwrap_or_default();
                    let runner_tag = attribute(&element, "runner").unwrap_or_default();
                    handler.start(&name, &runner_tag);
                    current = Some(CurrentOutcome {
                        name,
                        result: None,
                        text: String::new(),
                    });
                }
                b"result" => {
                    if let Some(current) = current.as_mut() {
                        current.result = parse_result(&element);
                    }
                }
                b"unstructured-output" => in_unstructured = true,
                other => {
                    debug!(
                        "Ignoring unknown monitor element `{}`",
                        String::from_utf8_lossy(other)
                    );
                }
            },
            Event::Empty(element) => {
                if element.name().as_ref() == b"result" {
                    if let Some(current) = current.as_mut() {
                        current.result = parse_result(&element);
                    }
                }
            }
            Event::Text(text) => {
                let Ok(fragment) = text.unescape() else {
                    warn!("Undecodable text fragment in monitor stream");
                    return false;
                };
                if in_unstructured {
                    handler.print(&fragment);
                } else if let Some(current) = current.as_mut() {
                    handler.output(&current.name, &fragment);
                    current.text.push_str(&fragment);
                }
            }
            Event::End(element) => match element.name().as_ref() {
                b"outcome" => {
                    if let Some(finished) = current.take() {
                        let result = finished.result.unwrap_or_else(|| {
                            warn!("Outcome {} ended without a result", finished.name);
                            RunResult::Error
                        });
                        let lines = if finished.text.is_empty() {
                            Vec::new()
                        } else {
                            finished.text.split('\n').map(str::to_owned).collect()
                        };
                        handler.finish(&Outcome::new(&finished.name, result, lines));
                    }
                }
                b"unstructured-output" => in_unstructured = false,
                name if name == ROOT_ELEMENT => completed_normally = true,
                _ => {}
            },
            Event::Eof => {
                remember(&mut recent, &buf);
                break;
            }
            _ => {}
        }
        remember(&mut recent, &buf);
    }

    if !completed_normally {
        warn!(
            "Monitor stream ended without completing; trailing bytes: {:?}",
            String::from_utf8_lossy(&recent)
        );
    }
    completed_normally
}

fn attribute(element: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    element
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attribute| attribute.unescape_value().ok())
        .map(|value| value.into_owned())
}

fn parse_result(element: &quick_xml::events::BytesStart) -> Option<RunResult> {
    let value = attribute(element, "value")?;
    match RunResult::from_str(&value) {
        Ok(result) => Some(result),
        Err(_) => {
            warn!("Unknown result value `{value}` in monitor stream");
            None
        }
    }
}

fn remember(recent: &mut Vec<u8>, bytes: &[u8]) {
    recent.extend_from_slice(bytes);
    if recent.len() > SNIPPET_LIMIT {
        let excess = recent.len() - SNIPPET_LIMIT;
        recent.drain(..excess);
    }
}

#[cfg(test)]
mod tests;
