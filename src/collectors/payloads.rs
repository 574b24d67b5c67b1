//! Schemas of the management API payloads
//!
//! Only the attributes the collectors read are declared; anything else the
//! NAS sends is ignored. Values whose type varies between DSM releases
//! (sizes, temperatures, statuses) are kept as [`FieldValue`].

use crate::events::FieldValue;
use serde::Deserialize;

/// Reply of the log viewer endpoint, newest record first
#[derive(Debug, Deserialize)]
pub struct LogWindow {
    pub items: Vec<serde_json::Value>,
}

/// One record of the system log
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LogRecord {
    /// Local wall-clock time, `YYYY/MM/DD HH:MM:SS`
    pub time: String,
    /// `info`, `warn` or `err`
    pub level: String,
    pub who: String,
    pub descr: String,
}

/// Reply of the storage manager `load_info` action
#[derive(Debug, Deserialize)]
pub struct StorageInfo {
    pub disks: Vec<Disk>,
    pub pools: Vec<Pool>,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
pub struct Disk {
    pub device: String,
    pub name: String,
    pub id: String,
    pub container: DiskContainer,
    pub model: String,
    pub size_total: FieldValue,
    pub status: FieldValue,
    pub temp: FieldValue,
}

/// Enclosure a disk sits in
#[derive(Debug, Deserialize)]
pub struct DiskContainer {
    /// Display name of the enclosure
    #[serde(rename = "str")]
    pub label: String,
    /// `internal` or an expansion unit type
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct Pool {
    pub id: String,
    pub device_type: String,
    pub container: String,
    pub size: PoolSize,
    pub disks: Vec<String>,
    pub status: FieldValue,
}

#[derive(Debug, Deserialize)]
pub struct PoolSize {
    pub total: FieldValue,
    pub used: FieldValue,
}

#[derive(Debug, Deserialize)]
pub struct Volume {
    pub id: String,
    pub device_type: String,
    pub container: String,
    pub fs_type: String,
    pub size: VolumeSize,
    pub disks: Vec<String>,
    pub status: FieldValue,
}

#[derive(Debug, Deserialize)]
pub struct VolumeSize {
    pub total_device: FieldValue,
    pub total: FieldValue,
    pub used: FieldValue,
}

/// Reply of the resource monitor `allget` action
#[derive(Debug, Deserialize)]
pub struct ResourceUsage {
    pub cpu: Samples,
    pub memory: Samples,
}

#[derive(Debug, Deserialize)]
pub struct Samples {
    pub values: Vec<FieldValue>,
}
