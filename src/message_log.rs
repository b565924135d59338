//! Append-only, line-oriented message log.
//!
//! One record per line:
//! `[YYYY-MM-DD HH:MM:SS] [location] author (author-id): "content"`

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};

use crate::platform::{InboundEvent, Origin};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub author: String,
    pub author_id: u64,
    pub content: String,
}

/// Location descriptor for an inbound event.
pub fn describe_origin(origin: &Origin, author: &str) -> String {
    match origin {
        Origin::Guild {
            guild_id,
            guild_name,
            channel_id,
            channel_name,
        } => format!(
            "Server: {} ({}) | Channel: #{} ({})",
            guild_name, guild_id, channel_name, channel_id
        ),
        Origin::Direct { channel_id } => {
            format!("DM with {} | Channel ID: {}", author, channel_id)
        }
    }
}

impl LogRecord {
    /// Record for an inbound event, stamped with its receive time.
    pub fn inbound(event: &InboundEvent) -> Self {
        Self {
            timestamp: event.timestamp.naive_local(),
            location: describe_origin(&event.origin, &event.author.name),
            author: event.author.name.clone(),
            author_id: event.author.id,
            content: event.content.clone(),
        }
    }

    /// Record for a reply the bot sent in answer to `event`.
    pub fn reply(event: &InboundEvent, kind: &str, bot_name: &str, bot_id: u64, text: &str) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            location: format!(
                "{} Response to {} ({})",
                kind, event.author.name, event.author.id
            ),
            author: bot_name.to_string(),
            author_id: bot_id,
            content: text.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "[{}] [{}] {} ({}): \"{}\"",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.location,
            self.author,
            self.author_id,
            self.content
        )
    }

    /// Parse one line (without its trailing newline) back into a record.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (stamp, rest) = rest.split_once("] [")?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

        // Free-text guild and channel names may contain "] ", so the
        // location is cut at the last one before the author.
        let (header, content) = rest.split_once("): \"")?;
        let (who, id) = header.rsplit_once(" (")?;
        let (location, author) = who.rsplit_once("] ")?;
        let author_id = id.parse().ok()?;
        let content = content.strip_suffix('"')?;

        Some(Self {
            timestamp,
            location: location.to_string(),
            author: author.to_string(),
            author_id,
            content: content.to_string(),
        })
    }
}

/// Shared append-only log file. Opened, written and closed per record.
#[derive(Debug, Clone)]
pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open message log: {}", self.path.display()))?;

        let mut line = record.to_line();
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write message log: {}", self.path.display()))?;
        Ok(())
    }

    /// Read every parseable record back. Unparseable lines are skipped.
    #[allow(dead_code)]
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read message log: {}", self.path.display()))?;
        Ok(content.lines().filter_map(LogRecord::parse).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(location: &str, author: &str, content: &str) -> LogRecord {
        LogRecord {
            timestamp: NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_opt(15, 9, 26)
                .unwrap(),
            location: location.to_string(),
            author: author.to_string(),
            author_id: 123456789012345678,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_line_format() {
        let r = record("DM with alice | Channel ID: 55", "alice", "hello");
        assert_eq!(
            r.to_line(),
            "[2025-03-14 15:09:26] [DM with alice | Channel ID: 55] alice (123456789012345678): \"hello\""
        );
    }

    #[test]
    fn test_parse_recovers_all_fields() {
        let cases = [
            record("Server: Rust (1) | Channel: #general (2)", "bob", "plain"),
            record("DM with eve (x) | Channel ID: 9", "eve (the admin)", "she said \"hi\""),
            record("DM Response to alice (42)", "relaybot#0420", "4"),
            record("DM with carol | Channel ID: 3", "carol", "tricky ): \" inside"),
            record("DM with dave | Channel ID: 4", "dave", ""),
            record("DM with zoë | Channel ID: 5", "zoë", "ünïcödé ✓ 漢字"),
            record("Server: a] b (1) | Channel: #[x] y (2)", "bob", "brackets ] in names"),
        ];
        for original in cases {
            let parsed = LogRecord::parse(&original.to_line()).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LogRecord::parse("").is_none());
        assert!(LogRecord::parse("not a record").is_none());
        assert!(LogRecord::parse("[2025-13-99 99:99:99] [x] a (1): \"c\"").is_none());
        assert!(LogRecord::parse("[2025-03-14 15:09:26] [x] a (abc): \"c\"").is_none());
    }

    #[test]
    fn test_describe_origin() {
        let guild = Origin::Guild {
            guild_id: 10,
            guild_name: "Rust".into(),
            channel_id: 20,
            channel_name: "general".into(),
        };
        assert_eq!(
            describe_origin(&guild, "bob"),
            "Server: Rust (10) | Channel: #general (20)"
        );
        assert_eq!(
            describe_origin(&Origin::Direct { channel_id: 30 }, "bob"),
            "DM with bob | Channel ID: 30"
        );
    }

    #[test]
    fn test_append_is_ordered_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path().join("messages.log"));

        let first = record("DM with a | Channel ID: 1", "a", "first");
        let second = record("DM Response to a (123456789012345678)", "bot", "second");
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        assert_eq!(log.read_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_append_to_unopenable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path().join("missing").join("messages.log"));
        assert!(log.append(&record("x", "a", "c")).is_err());
    }
}
