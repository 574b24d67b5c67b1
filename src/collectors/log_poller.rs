use crate::collectors::payloads::{LogRecord, LogWindow};
use crate::error::PollError;
use crate::events::{LogEvent, Severity, Timestamp};
use crate::session::{ApiRequest, ApiTransport};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};

/// Log viewer endpoint of the DSM web interface
pub const LOG_VIEWER_PATH: &str = "/webman/modules/SystemInfoApp/LogViewer.cgi";

/// Wall-clock format of the `time` attribute of a log record
pub const LOG_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Number of records requested per poll unless configured otherwise
pub const DEFAULT_LOG_WINDOW: usize = 50;

/// Identity of the newest log record seen by the previous poll
///
/// Holds the canonical JSON of the whole record. Two records with identical
/// content therefore share one cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor(String);

impl LogCursor {
    fn of(record: &serde_json::Value) -> Self {
        LogCursor(record.to_string())
    }

    fn matches(&self, record: &serde_json::Value) -> bool {
        self.0 == record.to_string()
    }
}

/// Incremental reader of the NAS system log
///
/// Each poll fetches the newest `window` records and turns the ones that
/// appeared since the previous poll into [`LogEvent`]s. The cursor lives in
/// memory only, so the first poll after a restart emits the whole window.
pub struct LogPoller {
    window: usize,
    cursor: Option<LogCursor>,
}

impl LogPoller {
    /// Create a poller reading `window` records per poll
    pub fn new(window: usize) -> Self {
        Self {
            window,
            cursor: None,
        }
    }

    /// Fetch the log window and return the records that are new, oldest first
    ///
    /// # Errors
    ///
    /// Returns `PollError::Transport` if the request fails and
    /// `PollError::Parse` if the reply does not match the log window schema.
    /// The cursor is left untouched on error.
    pub async fn poll(&mut self, api: &dyn ApiTransport) -> Result<Vec<LogEvent>, PollError> {
        let request = ApiRequest::get(LOG_VIEWER_PATH).param("limit", self.window);
        let body = api.request(&request).await?;

        let window: LogWindow =
            serde_json::from_str(&body).map_err(|e| PollError::parse("log window", e))?;

        Ok(self.ingest(window))
    }

    /// Current cursor, `None` before the first non-empty window
    pub fn cursor(&self) -> Option<&LogCursor> {
        self.cursor.as_ref()
    }

    /// Scan a newest-first window against the cursor
    ///
    /// Records that do not match the record schema are skipped with a
    /// warning, like records with an unparseable time.
    fn ingest(&mut self, window: LogWindow) -> Vec<LogEvent> {
        let newest = match window.items.first() {
            Some(record) => LogCursor::of(record),
            None => {
                debug!("Log window is empty");
                return Vec::new();
            }
        };

        // New records only ever appear at the front, so the scan stops at the
        // first record already seen.
        let mut fresh = Vec::new();
        for raw in &window.items {
            if self.cursor.as_ref().is_some_and(|cursor| cursor.matches(raw)) {
                break;
            }
            match serde_json::from_value::<LogRecord>(raw.clone()) {
                Ok(record) => fresh.push(record),
                Err(e) => warn!("Skipping malformed log record {}: {}", raw, e),
            }
        }

        let events = fresh
            .iter()
            .rev()
            .filter_map(|record| match Self::to_event(record) {
                Some(event) => Some(event),
                None => {
                    warn!(
                        "Skipping log record with unparseable time '{}': {}",
                        record.time, record.descr
                    );
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Log window of {} records, {} new",
            window.items.len(),
            events.len()
        );

        self.cursor = Some(newest);
        events
    }

    /// Convert one record, `None` if its time cannot be parsed
    fn to_event(record: &LogRecord) -> Option<LogEvent> {
        let timestamp = parse_log_time(&record.time)?;

        let severity = Severity::from_level(&record.level).unwrap_or_else(|| {
            debug!("Unknown log level '{}', reporting as info", record.level);
            Severity::Info
        });

        Some(LogEvent {
            timestamp,
            severity,
            user: record.who.clone(),
            message: record.descr.clone(),
        })
    }
}

/// Parse the NAS wall-clock time, interpreted in the local timezone
///
/// Returns `None` for malformed input and for times skipped by a daylight
/// saving transition. Ambiguous times resolve to the earlier instant.
pub fn parse_log_time(text: &str) -> Option<Timestamp> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), LOG_TIME_FORMAT).ok()?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local.with_timezone(&Utc))
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use serde_json::json;

    /// A log history and a number of records appended after the first poll
    #[derive(Debug, Clone)]
    struct ShiftedHistory {
        window: usize,
        initial: usize,
        appended: usize,
    }

    impl Arbitrary for ShiftedHistory {
        fn arbitrary(g: &mut Gen) -> Self {
            let window = (u8::arbitrary(g) % 50) as usize + 1;
            let initial = (u8::arbitrary(g) % 80) as usize + 1;
            let appended = (u8::arbitrary(g) as usize) % (window + 1);
            Self {
                window,
                initial,
                appended,
            }
        }
    }

    fn nth_record(n: usize) -> serde_json::Value {
        json!({
            "time": format!("2024/01/01 {:02}:{:02}:{:02}", (n / 3600) % 24, (n / 60) % 60, n % 60),
            "level": "info",
            "who": "SYSTEM",
            "descr": format!("event {}", n),
        })
    }

    /// Newest-first view of records `0..total`, truncated to `window`
    fn window_of(total: usize, window: usize) -> LogWindow {
        LogWindow {
            items: (0..total).rev().take(window).map(nth_record).collect(),
        }
    }

    // Shifting the window by k records emits exactly those k, oldest first
    #[quickcheck]
    fn prop_shifted_window_emits_exactly_new_records(history: ShiftedHistory) -> bool {
        let mut poller = LogPoller::new(history.window);

        poller.ingest(window_of(history.initial, history.window));

        let total = history.initial + history.appended;
        let events = poller.ingest(window_of(total, history.window));

        let expected: Vec<String> = (history.initial..total)
            .map(|n| format!("event {}", n))
            .collect();
        let actual: Vec<String> = events.into_iter().map(|e| e.message).collect();

        actual == expected
    }

    // Polling an unchanged window twice emits nothing the second time
    #[quickcheck]
    fn prop_unchanged_window_is_idempotent(history: ShiftedHistory) -> bool {
        let mut poller = LogPoller::new(history.window);
        let first = poller.ingest(window_of(history.initial, history.window));
        let second = poller.ingest(window_of(history.initial, history.window));

        first.len() == history.initial.min(history.window) && second.is_empty()
    }
}
