use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    attribution::Attribution,
    durable,
    error::{LeadError, Result},
};

pub const DELIMITER: u8 = b';';
pub const FIELD_COUNT: usize = 9;
pub const HEADER: [&str; FIELD_COUNT] = [
    "timestamp",
    "chat_id",
    "user_id",
    "event",
    "platform",
    "theme",
    "lead_type",
    "creative",
    "extra",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventTag {
    Start,
    LeadSent,
    LeadFileNotFound,
    LeadSendFailed,
    ButtonClick,
    Other(String),
}

impl EventTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::LeadSent => "lead_sent",
            Self::LeadFileNotFound => "lead_file_not_found",
            Self::LeadSendFailed => "lead_send_failed",
            Self::ButtonClick => "button_click",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for EventTag {
    fn from(value: &str) -> Self {
        match value.trim() {
            "start" => Self::Start,
            "lead_sent" => Self::LeadSent,
            "lead_file_not_found" => Self::LeadFileNotFound,
            "lead_send_failed" => Self::LeadSendFailed,
            "button_click" => Self::ButtonClick,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventTag {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<EventTag> for String {
    fn from(value: EventTag) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One interaction row of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub chat_id: String,
    pub user_id: String,
    pub event: EventTag,
    #[serde(flatten)]
    pub attribution: Attribution,
    pub extra: String,
}

impl EventRecord {
    /// A record stamped with the local wall clock and no chat id.
    pub fn new(
        user_id: impl Into<String>,
        event: EventTag,
        attribution: Attribution,
        extra: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            chat_id: String::new(),
            user_id: user_id.into(),
            event,
            attribution,
            extra: extra.into(),
        }
    }

    pub fn with_chat_id(mut self, chat_id: Option<i64>) -> Self {
        self.chat_id = chat_id.map(|id| id.to_string()).unwrap_or_default();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn is_lead_delivery(&self) -> bool {
        self.event == EventTag::LeadSent
    }

    /// Calendar day of the timestamp as written (no zone conversion).
    pub fn day(&self) -> Option<NaiveDate> {
        parse_day(&self.timestamp)
    }

    fn from_row(row: &StringRecord) -> Option<Self> {
        if row.len() < FIELD_COUNT {
            return None;
        }
        let user_id = row.get(2)?.trim();
        if user_id.is_empty() {
            return None;
        }
        // Anything past the ninth column belongs to the free-form `extra`.
        let extra = row
            .iter()
            .skip(FIELD_COUNT - 1)
            .collect::<Vec<_>>()
            .join(";");

        Some(Self {
            timestamp: row.get(0)?.trim().to_string(),
            chat_id: row.get(1)?.trim().to_string(),
            user_id: user_id.to_string(),
            event: EventTag::from(row.get(3)?),
            attribution: Attribution {
                platform: row.get(4)?.to_string(),
                theme: row.get(5)?.to_string(),
                lead_type: row.get(6)?.to_string(),
                creative: row.get(7)?.to_string(),
            },
            extra,
        })
    }

    fn to_fields(&self) -> [String; FIELD_COUNT] {
        [
            sanitize_field(&self.timestamp),
            sanitize_field(&self.chat_id),
            sanitize_field(&self.user_id),
            sanitize_field(self.event.as_str()),
            sanitize_field(&self.attribution.platform),
            sanitize_field(&self.attribution.theme),
            sanitize_field(&self.attribution.lead_type),
            sanitize_field(&self.attribution.creative),
            sanitize_field(&self.extra),
        ]
    }
}

pub fn parse_day(timestamp: &str) -> Option<NaiveDate> {
    let timestamp = timestamp.trim();
    if timestamp.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.date_naive());
    }
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(timestamp, format) {
            return Some(parsed.date());
        }
    }
    NaiveDate::parse_from_str(timestamp, "%Y-%m-%d").ok()
}

fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            ';' => ',',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStatus {
    Read,
    /// The log did not exist and was created with a header.
    Created,
    /// The log could not be decoded; it was quarantined and replaced by a
    /// header-only file.
    Reset {
        backup: Option<PathBuf>,
        reason: String,
    },
    /// Transient I/O failure; nothing was read and nothing was changed.
    Unreadable { reason: String },
}

#[derive(Debug, Clone)]
pub struct LogRead {
    /// Well-formed records past the skipped prefix.
    pub records: Vec<EventRecord>,
    /// Every data row in the file, malformed ones included.
    pub total_rows: u64,
    /// Malformed rows past the skipped prefix.
    pub malformed: u64,
    pub status: LogStatus,
}

impl LogRead {
    fn empty(status: LogStatus) -> Self {
        Self {
            records: Vec::new(),
            total_rows: 0,
            malformed: 0,
            status,
        }
    }
}

pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the log with its header when it does not exist. Returns
    /// whether a new file was created.
    pub fn ensure(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(&header_line()?)?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Appends one record as a single `write_all` of a complete line.
    pub fn append(&self, record: &EventRecord) -> Result<()> {
        if record.user_id.trim().is_empty() {
            return Err(LeadError::Validation("event record requires a user id".into()));
        }
        let _guard = self.write_lock.lock();
        self.ensure()?;

        let mut line = Vec::new();
        if !ends_with_newline(&self.path)? {
            line.push(b'\n');
        }
        line.extend_from_slice(&encode_line(&record.to_fields())?);

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    pub fn read_all(&self) -> LogRead {
        self.read_new_events(0)
    }

    /// Reads the rows past the first `skip_rows`. `total_rows` always counts
    /// the whole file so the caller can checkpoint past malformed rows.
    pub fn read_new_events(&self, skip_rows: u64) -> LogRead {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return match self.ensure() {
                    Ok(_) => LogRead::empty(LogStatus::Created),
                    Err(create_err) => {
                        warn!(
                            target: "leadbot.event_log",
                            "failed to create event log {}: {}",
                            self.path.display(),
                            create_err
                        );
                        LogRead::empty(LogStatus::Unreadable {
                            reason: create_err.to_string(),
                        })
                    }
                };
            }
            Err(err) => {
                warn!(
                    target: "leadbot.event_log",
                    "failed to open event log {}: {}",
                    self.path.display(),
                    err
                );
                return LogRead::empty(LogStatus::Unreadable {
                    reason: err.to_string(),
                });
            }
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(file);

        let mut records = Vec::new();
        let mut total_rows = 0u64;
        let mut malformed = 0u64;
        let mut row = StringRecord::new();
        loop {
            match reader.read_record(&mut row) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) if err.is_io_error() => {
                    warn!(
                        target: "leadbot.event_log",
                        "failed to read event log {}: {}",
                        self.path.display(),
                        err
                    );
                    return LogRead::empty(LogStatus::Unreadable {
                        reason: err.to_string(),
                    });
                }
                Err(err) => return self.reset(err.to_string()),
            }

            if is_blank(&row) {
                continue;
            }
            total_rows += 1;
            if total_rows <= skip_rows {
                continue;
            }
            match EventRecord::from_row(&row) {
                Some(record) => records.push(record),
                None => malformed += 1,
            }
        }

        if malformed > 0 {
            warn!(
                target: "leadbot.event_log",
                "skipped {} malformed row(s) in {}",
                malformed,
                self.path.display()
            );
        }

        LogRead {
            records,
            total_rows,
            malformed,
            status: LogStatus::Read,
        }
    }

    fn reset(&self, reason: String) -> LogRead {
        let backup = match durable::quarantine(&self.path) {
            Ok(backup) => Some(backup),
            Err(err) => {
                warn!(
                    target: "leadbot.event_log",
                    "failed to quarantine event log {}: {}",
                    self.path.display(),
                    err
                );
                None
            }
        };

        let _guard = self.write_lock.lock();
        match header_line().and_then(|header| durable::write_atomic(&self.path, &header)) {
            Ok(()) => info!(
                "event log {} was unreadable ({}); recreated with a fresh header",
                self.path.display(),
                reason
            ),
            Err(err) => warn!(
                target: "leadbot.event_log",
                "failed to recreate event log {}: {}",
                self.path.display(),
                err
            ),
        }

        LogRead::empty(LogStatus::Reset { backup, reason })
    }
}

fn encode_line<I, T>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote_style(QuoteStyle::Never)
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|err| LeadError::Io(io::Error::new(err.error().kind(), err.to_string())))
}

// A whitespace-only line parses as a single blank field; it is not a row.
fn is_blank(row: &StringRecord) -> bool {
    row.len() <= 1 && row.get(0).is_none_or(|field| field.trim().is_empty())
}

fn header_line() -> Result<Vec<u8>> {
    encode_line(HEADER)
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
