//! The concrete `LineParser` collaborator (spec §6, §10.E): Common Log
//! Format lines in, `ClfEvent`s out. The core never looks inside this
//! module; it only calls `LineParser::parse`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tailbeat_core::{LineParser, ParseError, TimestampedEvent};

/// `host ident authuser [timestamp] "method path proto" status bytes`
static CLF_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<host>\S+) (?P<ident>\S+) (?P<user>\S+) \[(?P<ts>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<proto>\S+)" (?P<status>\d{3}) (?P<bytes>\S+)$"#,
    )
    .expect("static CLF pattern is valid")
});

const CLF_TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// One parsed Common Log Format access-log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClfEvent {
    pub timestamp_millis: i64,
    pub host: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub bytes: u64,
}

impl TimestampedEvent for ClfEvent {
    fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }
}

impl ClfEvent {
    /// Re-renders the event as a CLF line. Used by test fixtures to
    /// generate synthetic traffic and to check the parse/format round
    /// trip named in spec §8 (L-1).
    pub fn to_line(&self) -> String {
        let dt = DateTime::<Utc>::from_timestamp_millis(self.timestamp_millis)
            .expect("in-range timestamp");
        format!(
            r#"{} - - [{}] "{} {} HTTP/1.1" {} {}"#,
            self.host,
            dt.format("%d/%b/%Y:%H:%M:%S +0000"),
            self.method,
            self.path,
            self.status,
            self.bytes,
        )
    }
}

/// Parses Common Log Format lines into [`ClfEvent`]s (spec §10.E).
#[derive(Debug, Default, Clone, Copy)]
pub struct ClfParser;

impl LineParser<ClfEvent> for ClfParser {
    fn parse(&self, line: &str) -> Result<Option<ClfEvent>, ParseError> {
        let caps = CLF_LINE
            .captures(line)
            .ok_or_else(|| ParseError(format!("line does not match CLF pattern: {line}")))?;

        let ts_raw = &caps["ts"];
        let timestamp_millis = DateTime::parse_from_str(ts_raw, CLF_TIMESTAMP_FORMAT)
            .map_err(|err| ParseError(format!("bad CLF timestamp '{ts_raw}': {err}")))?
            .with_timezone(&Utc)
            .timestamp_millis();

        let status: u16 = caps["status"]
            .parse()
            .map_err(|_| ParseError(format!("bad status code: {}", &caps["status"])))?;

        let bytes_raw = &caps["bytes"];
        let bytes: u64 = if bytes_raw == "-" {
            0
        } else {
            bytes_raw
                .parse()
                .map_err(|_| ParseError(format!("bad byte count: {bytes_raw}")))?
        };

        Ok(Some(ClfEvent {
            timestamp_millis,
            host: caps["host"].to_string(),
            method: caps["method"].to_string(),
            path: caps["path"].to_string(),
            status,
            bytes,
        }))
    }
}
