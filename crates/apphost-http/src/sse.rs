// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server-Sent Events encoding and parsing.
//!
//! Records are `event:`/`id:`/`retry:` fields plus one `data:` line per line
//! of payload, terminated by a blank line. Lines starting with `:` are
//! comments and ignored by the parser.

use crate::error::Result;
use crate::pipe::Pipe;

/// One SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseEvent {
    /// Create a data-only event.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Wire encoding, including the terminating blank line.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {retry}\n"));
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Accumulate lines until a blank line flushes a complete event.
/// `None` when the stream ended.
pub(crate) async fn read_event(pipe: &mut Pipe) -> Result<Option<SseEvent>> {
    let mut event: Option<String> = None;
    let mut id: Option<String> = None;
    let mut retry: Option<u64> = None;
    let mut data_lines: Vec<String> = Vec::new();
    let mut seen_field = false;

    loop {
        let line = match pipe.read_line().await? {
            Some(line) => line,
            // EOF: partial records are dropped.
            None => return Ok(None),
        };

        if line.is_empty() {
            if !seen_field {
                continue;
            }
            return Ok(Some(SseEvent {
                event,
                id,
                retry,
                data: data_lines.join("\n"),
            }));
        }
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line.as_str(), ""),
        };
        seen_field = true;
        match field {
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            "retry" => retry = value.parse().ok(),
            "data" => data_lines.push(value.to_string()),
            _ => {}
        }
    }
}
