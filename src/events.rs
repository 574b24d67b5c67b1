//! Core event types for the exporter
//!
//! This module defines the two canonical output shapes: log events bound for
//! the log sink and tagged time-series points bound for the metric sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Log event derived from one record of the NAS system log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    /// When the record was written on the NAS
    pub timestamp: Timestamp,
    /// Severity reported by the NAS
    pub severity: Severity,
    /// Account that triggered the record
    pub user: String,
    /// Record description
    pub message: String,
}

/// Severity of a NAS log record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Map the `level` string of a log record
    ///
    /// Returns `None` for levels outside `info`, `warn` and `err`.
    pub fn from_level(level: &str) -> Option<Self> {
        match level {
            "info" => Some(Severity::Info),
            "warn" => Some(Severity::Warn),
            "err" => Some(Severity::Error),
            _ => None,
        }
    }

    /// Syslog level sent to Graylog for this severity
    ///
    /// Info and Error are swapped relative to syslog convention; this is the
    /// mapping existing Graylog streams for these exporters were built on.
    pub fn syslog_level(self) -> u8 {
        match self {
            Severity::Info => 3,
            Severity::Warn => 4,
            Severity::Error => 6,
        }
    }
}

/// A scalar value carried by a metric tag or field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Integer(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// One time-series point
///
/// Tags identify the entity being measured, fields carry its values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    /// Measurement name, e.g. `disk` or `cpu`
    pub measurement: String,
    /// Identifying dimensions
    pub tags: BTreeMap<String, FieldValue>,
    /// Measured values
    pub fields: BTreeMap<String, FieldValue>,
    /// Capture time shared by every point of one collection
    pub timestamp: Timestamp,
}

impl MetricPoint {
    pub fn new(measurement: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}
