// Inbound line demultiplexer
// SPDX-License-Identifier: MPL-2.0
//
use crate::skstack::event::{self, Event, MultiKind, Starter};
use crate::skstack::response::Response;

/// What one input line turned into. Responses are always terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Event(Event),
    Response(Response),
}

/// Splits the inbound line stream into events and terminal responses.
///
/// A multi-line event stays pending until the next command echo, event
/// start, `OK` or `FAIL` closes it; whatever closes it is processed
/// afterwards, so a single `feed` can yield the finished event first and a
/// response second.
#[derive(Default)]
pub struct LineDemux {
    pending: Option<Pending>,
}

struct Pending {
    kind: MultiKind,
    lines: Vec<String>,
}

impl LineDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Vec<Output> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut out = Vec::new();
        if line.starts_with("SK") {
            // Command echo; swallow it.
            self.flush(&mut out);
        } else if line.starts_with('E') {
            self.flush(&mut out);
            match event::parse_starter(line) {
                Ok(Starter::Complete(ev)) => out.push(Output::Event(ev)),
                Ok(Starter::Incomplete(kind)) => {
                    self.pending = Some(Pending { kind, lines: Vec::new() })
                }
                Err(e) => tracing::warn!("discarding: {e}"),
            }
        } else if line.starts_with("OK") || line.starts_with("FAIL") {
            self.flush(&mut out);
            out.push(Output::Response(Response::classify(line)));
        } else if let Some(pending) = self.pending.as_mut() {
            pending.lines.push(line.to_string());
        } else if !line.is_empty() {
            out.push(Output::Response(Response::classify(line)));
        }
        out
    }

    fn flush(&mut self, out: &mut Vec<Output>) {
        if let Some(pending) = self.pending.take() {
            match event::finish(pending.kind, &pending.lines) {
                Ok(ev) => out.push(Output::Event(ev)),
                Err(e) => tracing::warn!("discarding: {e}"),
            }
        }
    }
}
