//! # Local Log File Fetcher
//!
//! Serves fetches from log files on the local filesystem. The business card
//! address is the file path. Each line has the form
//!
//! ```text
//! 2024-03-01T10:00:00.000000000Z 12.500000s info: Server ready
//! ```

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::codec::{format_time, parse_time};
use super::directory::LogBusinessCard;
use super::entry::{LogEntry, LogLevel};
use super::errors::{LogsError, LogsResult};
use super::fetch::{FetchError, FetchFuture, FetchResult, LogFetcher, TimeRange};

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\S+) (\d+(?:\.\d+)?)s (\w+): (.*)$").expect("Log line pattern cannot fail")
    })
}

/// Render an entry as one log file line (without the newline)
pub fn format_line(entry: &LogEntry) -> String {
    format!(
        "{} {:.6}s {}: {}",
        format_time(&entry.timestamp),
        entry.uptime.as_secs_f64(),
        entry.level,
        escape(&entry.message)
    )
}

fn escape(message: &str) -> String {
    message.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse one log file line
pub fn parse_line(line: &str) -> LogsResult<LogEntry> {
    let caps = line_pattern()
        .captures(line)
        .ok_or_else(|| LogsError::MalformedEntry(format!("unrecognised line `{}`", line)))?;

    let timestamp = parse_time(&caps[1])
        .map_err(|e| LogsError::MalformedEntry(format!("bad timestamp `{}`: {}", &caps[1], e)))?;
    let uptime: f64 = caps[2]
        .parse()
        .map_err(|_| LogsError::MalformedEntry(format!("bad uptime `{}`", &caps[2])))?;
    let uptime = Duration::try_from_secs_f64(uptime)
        .map_err(|e| LogsError::MalformedEntry(format!("bad uptime `{}`: {}", &caps[2], e)))?;
    let level: LogLevel = caps[3].parse()?;

    Ok(LogEntry::new(timestamp, uptime, level, unescape(&caps[4])))
}

/// Log fetcher that reads files named by the business card
#[derive(Debug, Default, Clone)]
pub struct FileLogFetcher;

impl FileLogFetcher {
    pub fn new() -> Self {
        Self
    }

    async fn read(path: &Path, max_entries: usize, range: TimeRange) -> FetchResult<Vec<LogEntry>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FetchError::Read(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut entries = Vec::new();
        // Newest lines are at the end of the file.
        for line in content.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = parse_line(line).map_err(|e| FetchError::Read(e.to_string()))?;
            if range.contains(&entry.timestamp) {
                entries.push(entry);
                if entries.len() >= max_entries {
                    break;
                }
            }
        }
        Ok(entries)
    }
}

impl LogFetcher for FileLogFetcher {
    fn fetch<'a>(
        &'a self,
        card: &'a LogBusinessCard,
        max_entries: usize,
        range: TimeRange,
        cancel: &'a CancellationToken,
    ) -> FetchFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(FetchError::Interrupted);
            }
            Self::read(Path::new(card.address()), max_entries, range).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn entry(secs: u32, message: &str) -> LogEntry {
        LogEntry::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, secs).unwrap(),
            Duration::from_millis(2500),
            LogLevel::Warn,
            message,
        )
    }

    #[test]
    fn test_line_round_trip() {
        let original = entry(5, "disk \"almost\" full\nsecond line");
        let parsed = parse_line(&format_line(&original)).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_backslashes_round_trip() {
        for message in ["C:\\new\\table", "ends with \\", "literal \\n and real\nbreak", "\\\\n"] {
            let original = entry(1, message);
            let line = format_line(&original);
            assert_eq!(line.lines().count(), 1);
            assert_eq!(parse_line(&line).unwrap().message, message);
        }
    }

    #[test]
    fn test_oversized_uptime_rejected() {
        let line = "2024-03-01T10:00:00Z 99999999999999999999999999s info: hi";
        assert!(matches!(parse_line(line), Err(LogsError::MalformedEntry(_))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_line("hello world").is_err());
        assert!(parse_line("2024-03-01T10:00:00Z 1.0s loud: hi").is_err());
    }

    #[tokio::test]
    async fn test_fetch_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for s in 0..5 {
            writeln!(file, "{}", format_line(&entry(s, &format!("m{}", s)))).unwrap();
        }
        let card = LogBusinessCard::new(file.path().to_string_lossy());
        let fetcher = FileLogFetcher::new();
        let cancel = CancellationToken::new();

        let newest = fetcher.fetch(&card, 2, TimeRange::all(), &cancel).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].message, "m4");
        assert_eq!(newest[1].message, "m3");

        let exact = fetcher
            .fetch(&card, 10, TimeRange::exactly(entry(2, "").timestamp), &cancel)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].message, "m2");
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let fetcher = FileLogFetcher::new();
        let cancel = CancellationToken::new();
        let result = fetcher
            .fetch(&LogBusinessCard::new("/nonexistent/clusterlogs.log"), 10, TimeRange::all(), &cancel)
            .await;
        assert!(matches!(result, Err(FetchError::Read(_))));
    }

    #[tokio::test]
    async fn test_oversized_uptime_is_read_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", format_line(&entry(0, "fine"))).unwrap();
        writeln!(file, "2024-03-01T10:00:01Z 99999999999999999999999999s info: hi").unwrap();
        let card = LogBusinessCard::new(file.path().to_string_lossy());
        let cancel = CancellationToken::new();
        let result = FileLogFetcher::new().fetch(&card, 10, TimeRange::all(), &cancel).await;
        assert!(matches!(result, Err(FetchError::Read(_))));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_read_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a log line").unwrap();
        let card = LogBusinessCard::new(file.path().to_string_lossy());
        let cancel = CancellationToken::new();
        let result = FileLogFetcher::new().fetch(&card, 10, TimeRange::all(), &cancel).await;
        assert!(matches!(result, Err(FetchError::Read(_))));
    }
}
