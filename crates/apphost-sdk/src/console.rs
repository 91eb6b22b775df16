// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-app bounded log console with event fan-out.
//!
//! The console keeps the newest N messages (default 20) in a FIFO. Pushing
//! into a full console first emits the evicted message as
//! [`ConsoleEvent::Overflow`], then the new one as [`ConsoleEvent::Log`];
//! [`Console::clear`] emits a snapshot. Message UUIDs are v4 and unique per
//! process.
//!
//! The formatter takes printf-style specifiers on the first argument
//! (`%s %d %i %f %o %O %c`, with `%%` as a literal percent and `%c`
//! consuming its argument silently); remaining arguments are space-joined.
//! The HTML rendering escapes `& < > " ' \``, turns `\n` into `<br>` and
//! wraps object arguments in `<pre>` blocks of pretty JSON.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::events::EventBus;
use crate::types::{LogLevel, LogMessage};

/// Default FIFO bound.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Events emitted by a console.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    /// A message was pushed.
    Log(LogMessage),
    /// The FIFO was full; this message was evicted (emitted before the
    /// `Log` event of the message that displaced it).
    Overflow(LogMessage),
    /// The console was cleared; carries the discarded snapshot.
    Clear(Vec<LogMessage>),
}

struct Inner {
    queue: VecDeque<LogMessage>,
    max_len: usize,
}

/// Bounded log FIFO with broadcast fan-out. Cloneable handle.
#[derive(Clone)]
pub struct Console {
    inner: Arc<Mutex<Inner>>,
    events: EventBus<ConsoleEvent>,
}

impl Console {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_MESSAGES)
    }

    pub fn with_capacity(max_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                max_len: max_len.max(1),
            })),
            events: EventBus::new(),
        }
    }

    pub fn log(&self, fmt: &str, args: &[Value]) {
        self.push(LogLevel::Log, fmt, args);
    }

    pub fn info(&self, fmt: &str, args: &[Value]) {
        self.push(LogLevel::Info, fmt, args);
    }

    pub fn warn(&self, fmt: &str, args: &[Value]) {
        self.push(LogLevel::Warn, fmt, args);
    }

    pub fn error(&self, fmt: &str, args: &[Value]) {
        self.push(LogLevel::Error, fmt, args);
    }

    fn push(&self, level: LogLevel, fmt: &str, args: &[Value]) {
        let (message, html) = format_parts(fmt, args);
        let record = LogMessage {
            level,
            message,
            html,
            error: matches!(level, LogLevel::Error),
            uuid: Uuid::new_v4().to_string(),
        };

        let evicted = {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let evicted = if inner.queue.len() >= inner.max_len {
                inner.queue.pop_front()
            } else {
                None
            };
            inner.queue.push_back(record.clone());
            evicted
        };

        if let Some(old) = evicted {
            self.events.emit(ConsoleEvent::Overflow(old));
        }
        self.events.emit(ConsoleEvent::Log(record));
    }

    /// Drop all messages, emitting the snapshot as [`ConsoleEvent::Clear`].
    pub fn clear(&self) {
        let snapshot: Vec<LogMessage> = {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.queue.drain(..).collect()
        };
        self.events.emit(ConsoleEvent::Clear(snapshot));
    }

    /// Snapshot of the current backlog, oldest first.
    pub fn messages(&self) -> Vec<LogMessage> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listen for log/overflow/clear events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").field("len", &self.len()).finish()
    }
}

/// Escape text for HTML output.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' => out.push_str("&#96;"),
            _ => out.push(ch),
        }
    }
    out
}

enum Piece {
    Text(String),
    Object(String),
}

/// Render `fmt` + `args` into (plain text, html).
pub fn format_parts(fmt: &str, args: &[Value]) -> (String, String) {
    let mut pieces: Vec<Piece> = Vec::new();
    let mut literal = String::new();
    let mut arg_iter = args.iter();
    let mut chars = fmt.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            literal.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                literal.push('%');
            }
            Some(spec @ ('s' | 'd' | 'i' | 'f' | 'o' | 'O' | 'c')) => {
                chars.next();
                match arg_iter.next() {
                    Some(arg) => match spec {
                        's' => literal.push_str(&text_of(arg)),
                        'd' | 'i' => literal.push_str(&integer_of(arg)),
                        'f' => literal.push_str(&float_of(arg)),
                        'o' | 'O' => {
                            if !literal.is_empty() {
                                pieces.push(Piece::Text(std::mem::take(&mut literal)));
                            }
                            pieces.push(Piece::Object(pretty_of(arg)));
                        }
                        // %c is a CSS style hook; the argument is consumed
                        // and produces no output.
                        'c' => {}
                        _ => unreachable!(),
                    },
                    // No argument left: the specifier stays literal.
                    None => {
                        literal.push('%');
                        literal.push(spec);
                    }
                }
            }
            _ => literal.push('%'),
        }
    }

    // Unconsumed arguments are space-joined after the formatted text.
    for arg in arg_iter {
        if !literal.is_empty() {
            literal.push(' ');
        }
        if is_object_like(arg) {
            if !literal.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Object(pretty_of(arg)));
        } else {
            literal.push_str(&text_of(arg));
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Text(literal));
    }

    let mut text = String::new();
    let mut html = String::new();
    for piece in &pieces {
        match piece {
            Piece::Text(t) => {
                text.push_str(t);
                html.push_str(&escape_html(t).replace('\n', "<br>"));
            }
            Piece::Object(json) => {
                text.push_str(json);
                html.push_str("<pre>");
                html.push_str(&escape_html(json));
                html.push_str("</pre>");
            }
        }
    }
    (text, html)
}

fn is_object_like(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn integer_of(value: &Value) -> String {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_f64().map(|f| (f.trunc() as i64).to_string()))
            .unwrap_or_else(|| "NaN".to_string()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| (f.trunc() as i64).to_string())
            .unwrap_or_else(|_| "NaN".to_string()),
        _ => "NaN".to_string(),
    }
}

fn float_of(value: &Value) -> String {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "NaN".to_string()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.to_string())
            .unwrap_or_else(|_| "NaN".to_string()),
        _ => "NaN".to_string(),
    }
}

fn pretty_of(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_specifiers() {
        let (text, _) = format_parts("%s is %d years", &[json!("ada"), json!(36)]);
        assert_eq!(text, "ada is 36 years");

        let (text, _) = format_parts("%i %f", &[json!(3.9), json!(2.5)]);
        assert_eq!(text, "3 2.5");

        let (text, _) = format_parts("%d", &[json!("not a number")]);
        assert_eq!(text, "NaN");

        // %% is a literal percent, missing args keep the specifier.
        let (text, _) = format_parts("100%% and %s", &[]);
        assert_eq!(text, "100% and %s");
    }

    #[test]
    fn test_style_specifier_consumed_silently() {
        let (text, _) = format_parts("%cstyled", &[json!("color: red")]);
        assert_eq!(text, "styled");
    }

    #[test]
    fn test_trailing_args_space_joined() {
        let (text, _) = format_parts("ready", &[json!("a"), json!(1)]);
        assert_eq!(text, "ready a 1");
    }

    #[test]
    fn test_object_renders_as_pre_block() {
        let (text, html) = format_parts("state: %O", &[json!({"x": 1})]);
        assert!(text.contains("\"x\": 1"));
        assert!(html.starts_with("state: <pre>"));
        assert!(html.ends_with("</pre>"));
    }

    #[test]
    fn test_html_escaping_and_linebreaks() {
        let (text, html) = format_parts("%s", &[json!("<b>\"hi\" & 'bye'`\nnext")]);
        assert_eq!(text, "<b>\"hi\" & 'bye'`\nnext");
        assert_eq!(
            html,
            "&lt;b&gt;&quot;hi&quot; &amp; &#39;bye&#39;&#96;<br>next"
        );
    }
}
