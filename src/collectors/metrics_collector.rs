use crate::collectors::payloads::{Disk, Pool, ResourceUsage, Samples, StorageInfo, Volume};
use crate::error::PollError;
use crate::events::{MetricPoint, Timestamp};
use crate::session::{ApiRequest, ApiTransport};
use chrono::Utc;
use log::debug;
use serde::de::DeserializeOwned;

/// Storage manager endpoint of the DSM web interface
pub const STORAGE_PATH: &str = "/webman/modules/StorageManager/storagehandler.cgi";

/// Resource monitor endpoint of the DSM web interface
pub const RESOURCE_PATH: &str = "/webman/modules/ResourceMonitor/rsrcmonitor.cgi";

/// Collector of storage and resource usage metrics
///
/// Each collection reads two snapshots, the storage topology (disks, pools,
/// volumes) and the resource monitor samples (CPU, memory), and flattens them
/// into one batch of [`MetricPoint`]s sharing a single capture timestamp.
#[derive(Debug, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Fetch both snapshots and flatten them into points
    ///
    /// Points come out as disks, pools, volumes, CPU samples, then memory
    /// samples.
    ///
    /// # Errors
    ///
    /// Returns `PollError::Transport` if either request fails and
    /// `PollError::Parse` if either reply does not match its schema. Nothing
    /// is returned for a partially successful collection.
    pub async fn collect(&self, api: &dyn ApiTransport) -> Result<Vec<MetricPoint>, PollError> {
        let timestamp = Utc::now();

        let storage: StorageInfo = fetch(
            api,
            "storage",
            ApiRequest::post(STORAGE_PATH).param("action", "load_info"),
        )
        .await?;

        let usage: ResourceUsage = fetch(
            api,
            "resource usage",
            ApiRequest::post(RESOURCE_PATH).param("action", "allget"),
        )
        .await?;

        let points = flatten(&storage, &usage, timestamp);
        debug!(
            "Collected {} points ({} disks, {} pools, {} volumes, {} cpu, {} memory)",
            points.len(),
            storage.disks.len(),
            storage.pools.len(),
            storage.volumes.len(),
            usage.cpu.values.len(),
            usage.memory.values.len()
        );

        Ok(points)
    }
}

async fn fetch<T: DeserializeOwned>(
    api: &dyn ApiTransport,
    endpoint: &str,
    request: ApiRequest,
) -> Result<T, PollError> {
    let body = api.request(&request).await?;
    serde_json::from_str(&body).map_err(|e| PollError::parse(endpoint, e))
}

/// Flatten both snapshots into one ordered batch stamped with `timestamp`
pub fn flatten(
    storage: &StorageInfo,
    usage: &ResourceUsage,
    timestamp: Timestamp,
) -> Vec<MetricPoint> {
    let mut points = Vec::with_capacity(
        storage.disks.len()
            + storage.pools.len()
            + storage.volumes.len()
            + usage.cpu.values.len()
            + usage.memory.values.len(),
    );

    points.extend(storage.disks.iter().map(|disk| disk_point(disk, timestamp)));
    points.extend(storage.pools.iter().map(|pool| pool_point(pool, timestamp)));
    points.extend(
        storage
            .volumes
            .iter()
            .map(|volume| volume_point(volume, timestamp)),
    );
    points.extend(sample_points("cpu", &usage.cpu, timestamp));
    points.extend(sample_points("memory", &usage.memory, timestamp));

    points
}

fn disk_point(disk: &Disk, timestamp: Timestamp) -> MetricPoint {
    MetricPoint::new("disk", timestamp)
        .tag("device", disk.device.as_str())
        .tag("name", disk.name.as_str())
        .tag("id", disk.id.as_str())
        .tag("nas", disk.container.label.as_str())
        .tag("location", disk.container.kind.as_str())
        .tag("model", disk.model.as_str())
        .tag("size", disk.size_total.clone())
        .field("status", disk.status.clone())
        .field("temp", disk.temp.clone())
}

fn pool_point(pool: &Pool, timestamp: Timestamp) -> MetricPoint {
    MetricPoint::new("pool", timestamp)
        .tag("id", pool.id.as_str())
        .tag("type", pool.device_type.as_str())
        .tag("location", pool.container.as_str())
        .field("total", pool.size.total.clone())
        .field("used", pool.size.used.clone())
        .field("disks", pool.disks.join(";"))
        .field("status", pool.status.clone())
}

fn volume_point(volume: &Volume, timestamp: Timestamp) -> MetricPoint {
    MetricPoint::new("volume", timestamp)
        .tag("id", volume.id.as_str())
        .tag("type", volume.device_type.as_str())
        .tag("location", volume.container.as_str())
        .tag("fs_type", volume.fs_type.as_str())
        .field("total_device", volume.size.total_device.clone())
        .field("total", volume.size.total.clone())
        .field("used", volume.size.used.clone())
        .field("disks", volume.disks.join(";"))
        .field("status", volume.status.clone())
}

fn sample_points<'a>(
    measurement: &'a str,
    samples: &'a Samples,
    timestamp: Timestamp,
) -> impl Iterator<Item = MetricPoint> + 'a {
    samples.values.iter().enumerate().map(move |(index, value)| {
        MetricPoint::new(measurement, timestamp)
            .tag("id", index)
            .field("value", value.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::events::FieldValue;
    use crate::session::MockTransport;

    const STORAGE_JSON: &str = r#"{
        "success": true,
        "disks": [
            {
                "device": "/dev/sata1", "name": "Drive 1", "id": "sata1",
                "container": {"str": "DS920+", "type": "internal"},
                "model": "WD40EFRX", "size_total": "4000787030016",
                "status": "normal", "temp": 34
            },
            {
                "device": "/dev/sata2", "name": "Drive 2", "id": "sata2",
                "container": {"str": "DS920+", "type": "internal"},
                "model": "WD40EFRX", "size_total": "4000787030016",
                "status": "normal", "temp": 36
            }
        ],
        "pools": [
            {
                "id": "reuse_1", "device_type": "shr_without_disk_protect",
                "container": "internal",
                "size": {"total": "7991698620416", "used": "7971698620416"},
                "disks": ["sata1", "sata2"], "status": "normal"
            }
        ],
        "volumes": [
            {
                "id": "volume_1", "device_type": "shr_without_disk_protect",
                "container": "internal", "fs_type": "btrfs",
                "size": {"total_device": "7991698620416", "total": "7676578590720", "used": "2137845760000"},
                "disks": ["sata1", "sata2"], "status": "normal"
            }
        ]
    }"#;

    const RESOURCE_JSON: &str = r#"{
        "cpu": {"values": [12, 7, 3, 25]},
        "memory": {"values": [41, 43]}
    }"#;

    fn healthy_mock() -> MockTransport {
        let mock = MockTransport::new();
        mock.respond(STORAGE_PATH, STORAGE_JSON);
        mock.respond(RESOURCE_PATH, RESOURCE_JSON);
        mock
    }

    #[tokio::test]
    async fn test_collect_fans_out_every_entity() {
        let mock = healthy_mock();
        let points = MetricsCollector::new().collect(&mock).await.unwrap();

        // 2 disks + 1 pool + 1 volume + 4 cpu + 2 memory
        assert_eq!(points.len(), 10);

        let measurements: Vec<&str> = points.iter().map(|p| p.measurement.as_str()).collect();
        assert_eq!(
            measurements,
            vec!["disk", "disk", "pool", "volume", "cpu", "cpu", "cpu", "cpu", "memory", "memory"]
        );

        let first = points[0].timestamp;
        assert!(points.iter().all(|p| p.timestamp == first));
    }

    #[tokio::test]
    async fn test_collect_sends_actions() {
        let mock = healthy_mock();
        MetricsCollector::new().collect(&mock).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, STORAGE_PATH);
        assert_eq!(
            requests[0].params,
            vec![("action".to_string(), "load_info".to_string())]
        );
        assert_eq!(requests[1].path, RESOURCE_PATH);
        assert_eq!(
            requests[1].params,
            vec![("action".to_string(), "allget".to_string())]
        );
    }

    #[tokio::test]
    async fn test_disk_point_tags_and_fields() {
        let points = MetricsCollector::new().collect(&healthy_mock()).await.unwrap();
        let disk = &points[0];

        assert_eq!(disk.tags.get("device"), Some(&FieldValue::from("/dev/sata1")));
        assert_eq!(disk.tags.get("name"), Some(&FieldValue::from("Drive 1")));
        assert_eq!(disk.tags.get("id"), Some(&FieldValue::from("sata1")));
        assert_eq!(disk.tags.get("nas"), Some(&FieldValue::from("DS920+")));
        assert_eq!(disk.tags.get("location"), Some(&FieldValue::from("internal")));
        assert_eq!(disk.tags.get("model"), Some(&FieldValue::from("WD40EFRX")));
        assert_eq!(disk.tags.get("size"), Some(&FieldValue::from("4000787030016")));
        assert_eq!(disk.tags.len(), 7);

        assert_eq!(disk.fields.get("status"), Some(&FieldValue::from("normal")));
        assert_eq!(disk.fields.get("temp"), Some(&FieldValue::Integer(34)));
        assert_eq!(disk.fields.len(), 2);
    }

    #[tokio::test]
    async fn test_pool_and_volume_points() {
        let points = MetricsCollector::new().collect(&healthy_mock()).await.unwrap();

        let pool = &points[2];
        assert_eq!(pool.tags.get("id"), Some(&FieldValue::from("reuse_1")));
        assert_eq!(
            pool.tags.get("type"),
            Some(&FieldValue::from("shr_without_disk_protect"))
        );
        assert_eq!(pool.tags.get("location"), Some(&FieldValue::from("internal")));
        assert_eq!(pool.fields.get("disks"), Some(&FieldValue::from("sata1;sata2")));
        assert_eq!(pool.fields.get("total"), Some(&FieldValue::from("7991698620416")));
        assert_eq!(pool.fields.get("used"), Some(&FieldValue::from("7971698620416")));
        assert_eq!(pool.fields.get("status"), Some(&FieldValue::from("normal")));

        let volume = &points[3];
        assert_eq!(volume.tags.get("fs_type"), Some(&FieldValue::from("btrfs")));
        assert_eq!(volume.tags.len(), 4);
        assert_eq!(
            volume.fields.get("total_device"),
            Some(&FieldValue::from("7991698620416"))
        );
        assert_eq!(volume.fields.get("disks"), Some(&FieldValue::from("sata1;sata2")));
        assert_eq!(volume.fields.len(), 5);
    }

    #[tokio::test]
    async fn test_sample_points_are_indexed() {
        let points = MetricsCollector::new().collect(&healthy_mock()).await.unwrap();

        let cpu: Vec<&MetricPoint> = points.iter().filter(|p| p.measurement == "cpu").collect();
        for (index, point) in cpu.iter().enumerate() {
            assert_eq!(point.tags.get("id"), Some(&FieldValue::Integer(index as i64)));
        }
        assert_eq!(cpu[3].fields.get("value"), Some(&FieldValue::Integer(25)));

        let memory: Vec<&MetricPoint> =
            points.iter().filter(|p| p.measurement == "memory").collect();
        assert_eq!(memory[1].tags.get("id"), Some(&FieldValue::Integer(1)));
        assert_eq!(memory[1].fields.get("value"), Some(&FieldValue::Integer(43)));
    }

    #[tokio::test]
    async fn test_resource_failure_fails_whole_collection() {
        let mock = MockTransport::new();
        mock.respond(STORAGE_PATH, STORAGE_JSON);
        mock.fail(
            RESOURCE_PATH,
            TransportError::Request {
                path: RESOURCE_PATH.to_string(),
                reason: "connection reset".to_string(),
            },
        );

        let err = MetricsCollector::new().collect(&mock).await.unwrap_err();
        assert!(matches!(err, PollError::Transport(_)));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_parse_error() {
        let mock = MockTransport::new();
        mock.respond(STORAGE_PATH, r#"{"disks": [], "pools": []}"#);
        mock.respond(RESOURCE_PATH, RESOURCE_JSON);

        let err = MetricsCollector::new().collect(&mock).await.unwrap_err();
        match err {
            PollError::Parse { endpoint, .. } => assert_eq!(endpoint, "storage"),
            other => panic!("Expected parse error, got {}", other),
        }
        assert_eq!(mock.call_count(RESOURCE_PATH), 0);
    }

    #[tokio::test]
    async fn test_empty_snapshots_produce_no_points() {
        let mock = MockTransport::new();
        mock.respond(STORAGE_PATH, r#"{"disks": [], "pools": [], "volumes": []}"#);
        mock.respond(RESOURCE_PATH, r#"{"cpu": {"values": []}, "memory": {"values": []}}"#);

        let points = MetricsCollector::new().collect(&mock).await.unwrap();
        assert!(points.is_empty());
    }
}
