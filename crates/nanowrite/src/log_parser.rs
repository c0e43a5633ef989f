//! Parser for NanoWrite's message log.
//!
//! The message panel and the `*_Messages.log` files share one layout: a
//! timestamp prefix starts an entry, every other line continues the one
//! before it.

use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::str::Lines;
use tracing::debug;

/// Written into the log in front of every submitted command so the output of
/// that command can be told apart from older messages.
pub const COMMAND_SEPARATOR: &str = "***Separator***";

static CLOCK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s?(.*)$").expect("valid regex"));

static ISO_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?)(Z|[+-]\d{2}:?\d{2})?\s+(.*)$")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LogTimestamp {
    /// `[HH:MM:SS]` as shown in the message panel
    Clock(NaiveTime),
    /// ISO timestamp without an offset
    Local(NaiveDateTime),
    /// ISO timestamp with its UTC offset, as written to the message files
    Zoned(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn infer(message: &str) -> Self {
        if message.contains("!!!") {
            LogLevel::Error
        } else if message.trim_start().to_lowercase().starts_with("warning") {
            LogLevel::Warning
        } else {
            LogLevel::Info
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: LogTimestamp,
    pub level: LogLevel,
    /// Headline and continuation lines joined by `\n`
    pub message: String,
    /// Lines that followed the headline without a timestamp of their own
    pub continuation: Vec<String>,
}

impl LogEntry {
    fn new(timestamp: LogTimestamp, headline: &str) -> Self {
        Self {
            timestamp,
            level: LogLevel::infer(headline),
            message: headline.to_string(),
            continuation: Vec::new(),
        }
    }

    fn push_continuation(&mut self, line: &str) {
        self.message.push('\n');
        self.message.push_str(line);
        self.continuation.push(line.to_string());
        if self.level != LogLevel::Error && line.contains("!!!") {
            self.level = LogLevel::Error;
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

/// Splits a line into its timestamp and message. Anything that does not
/// match the strict prefix, including OCR-garbled stamps, yields `None`.
fn split_timestamp(line: &str) -> Option<(LogTimestamp, &str)> {
    if let Some(caps) = CLOCK_PREFIX.captures(line) {
        let time = NaiveTime::parse_from_str(caps.get(1)?.as_str(), "%H:%M:%S").ok()?;
        return Some((LogTimestamp::Clock(time), caps.get(2).map_or("", |m| m.as_str())));
    }

    let caps = ISO_PREFIX.captures(line)?;
    let stamp = caps.get(1)?.as_str();
    let message = caps.get(3).map_or("", |m| m.as_str());
    let timestamp = match caps.get(2).map(|m| m.as_str()) {
        Some("Z") => {
            let naive = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
            LogTimestamp::Zoned(naive.and_utc().fixed_offset())
        }
        Some(offset) => LogTimestamp::Zoned(
            DateTime::parse_from_str(&format!("{stamp}{offset}"), "%Y-%m-%dT%H:%M:%S%.f%:z")
                .or_else(|_| {
                    DateTime::parse_from_str(&format!("{stamp}{offset}"), "%Y-%m-%dT%H:%M:%S%.f%z")
                })
                .ok()?,
        ),
        None => LogTimestamp::Local(
            NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f").ok()?,
        ),
    };
    Some((timestamp, message))
}

/// Lazy sequence of log entries over captured text. Clone it to iterate
/// the same text again.
#[derive(Debug, Clone)]
pub struct LogEntries<'a> {
    lines: Peekable<Lines<'a>>,
    started: bool,
}

/// Parses captured log text. Nothing is read until the sequence is iterated.
pub fn parse_log(text: &str) -> LogEntries<'_> {
    LogEntries {
        lines: text.lines().peekable(),
        started: false,
    }
}

impl Iterator for LogEntries<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        // The first visible line may be the tail of an entry scrolled out of view
        if !self.started {
            self.started = true;
            while let Some(line) = self.lines.peek() {
                if split_timestamp(line.trim_end()).is_some() {
                    break;
                }
                debug!("discarding log line without a preceding entry: {:?}", line);
                self.lines.next();
            }
        }

        let line = self.lines.next()?.trim_end();
        let (timestamp, headline) = split_timestamp(line)?;
        let mut entry = LogEntry::new(timestamp, headline);

        while let Some(next) = self.lines.peek() {
            let next = next.trim_end();
            if split_timestamp(next).is_some() {
                break;
            }
            let continuation = next.trim_start();
            if !continuation.is_empty() {
                entry.push_continuation(continuation);
            }
            self.lines.next();
        }

        Some(entry)
    }
}

/// Entries written since the last one containing `marker`, marker included.
/// The whole log is returned when the marker never appears.
pub fn entries_since<'e>(entries: &'e [LogEntry], marker: &str) -> &'e [LogEntry] {
    match entries.iter().rposition(|e| e.message.contains(marker)) {
        Some(idx) => &entries[idx..],
        None => entries,
    }
}

/// Output of the most recently submitted mini-console command.
pub fn command_log(entries: &[LogEntry]) -> &[LogEntry] {
    entries_since(entries, COMMAND_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(h: u32, m: u32, s: u32) -> LogTimestamp {
        LogTimestamp::Clock(NaiveTime::from_hms_opt(h, m, s).unwrap())
    }

    #[test]
    fn test_continuation_lines_merge_into_previous_entry() {
        let text = "[12:00:01] Starting job\ncontinued line\n[12:00:05] Job finished";
        let entries: Vec<_> = parse_log(text).collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, clock(12, 0, 1));
        assert_eq!(entries[0].message, "Starting job\ncontinued line");
        assert_eq!(entries[0].continuation, vec!["continued line".to_string()]);
        assert_eq!(entries[1].timestamp, clock(12, 0, 5));
        assert_eq!(entries[1].message, "Job finished");
        assert!(entries[1].continuation.is_empty());
    }

    #[test]
    fn test_one_entry_per_timestamped_line_in_order() {
        let lines: Vec<String> = (0..30)
            .map(|i| format!("[10:{:02}:{:02}] message {i}", i / 60, i % 60))
            .collect();
        let text = lines.join("\r\n");

        let entries: Vec<_> = parse_log(&text).collect();
        assert_eq!(entries.len(), lines.len());
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.message, format!("message {i}"));
            assert_eq!(entry.timestamp, clock(10, 0, i as u32));
        }
    }

    #[test]
    fn test_leading_fragment_is_discarded() {
        let text = "tail of an older message\nmore tail\n[08:15:00] first\n";
        let entries: Vec<_> = parse_log(text).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "first");
    }

    #[test]
    fn test_garbled_timestamp_becomes_continuation() {
        let text = "[12:00:01] Writing\n[12:0O:02] Layer 3\n[12:61:00] bogus clock";
        let entries: Vec<_> = parse_log(text).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].continuation,
            vec!["[12:0O:02] Layer 3".to_string(), "[12:61:00] bogus clock".to_string()]
        );
    }

    #[test]
    fn test_only_fragments_yields_nothing() {
        assert_eq!(parse_log("no stamp\nstill none").count(), 0);
        assert_eq!(parse_log("").count(), 0);
    }

    #[test]
    fn test_parse_is_restartable() {
        let entries = parse_log("[00:00:01] a\n[00:00:02] b");
        let first: Vec<_> = entries.clone().collect();
        let second: Vec<_> = entries.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_messages_file_layout() {
        let text = "2013-07-08T16:17:00.123+02:00 Loading structure C:\\jobs\\a.gwl\n\
                    \x20                             compiled 12 layers\n\
                    2013-07-08T16:17:05.000+02:00 done.\n\
                    2013-07-08T16:18:00 local stamp";
        let entries: Vec<_> = parse_log(text).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].message,
            "Loading structure C:\\jobs\\a.gwl\ncompiled 12 layers"
        );
        match entries[0].timestamp {
            LogTimestamp::Zoned(ts) => assert_eq!(ts.offset().local_minus_utc(), 2 * 3600),
            other => panic!("expected zoned timestamp, got {other:?}"),
        }
        assert!(matches!(entries[2].timestamp, LogTimestamp::Local(_)));
    }

    #[test]
    fn test_levels() {
        let text = "[00:00:01] Warning: stage limit\n[00:00:02] !!! Galvo error\n[00:00:03] ok\n  follow-up !!! fault";
        let entries: Vec<_> = parse_log(text).collect();
        assert_eq!(entries[0].level, LogLevel::Warning);
        assert_eq!(entries[1].level, LogLevel::Error);
        assert!(entries[2].is_error());
    }

    #[test]
    fn test_command_log_starts_at_last_separator() {
        let text = format!(
            "[00:00:01] {COMMAND_SEPARATOR}\n[00:00:02] done.\n[00:00:03] {COMMAND_SEPARATOR}\n[00:00:04] moving"
        );
        let entries: Vec<_> = parse_log(&text).collect();
        let cmd = command_log(&entries);
        assert_eq!(cmd.len(), 2);
        assert_eq!(cmd[1].message, "moving");

        let none: Vec<_> = parse_log("[00:00:01] a").collect();
        assert_eq!(command_log(&none).len(), 1);
    }
}
