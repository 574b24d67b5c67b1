use crate::error::SinkError;
use crate::events::{FieldValue, MetricPoint};
use crate::sinks::MetricSink;
use log::{debug, warn};
use reqwest::{Client, Url};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// InfluxDB 1.x sink using the `/write` HTTP endpoint
pub struct InfluxSink {
    client: Client,
    base_url: String,
    database: String,
    credentials: Option<(String, String)>,
}

impl InfluxSink {
    /// Create a sink writing to `database` on the given server
    ///
    /// `address` may carry a scheme; plain host names are reached over HTTP.
    /// A port already present in `address` takes precedence over `port`,
    /// unless it is the default port of the scheme.
    /// Credentials are sent as basic auth when a user name is given.
    pub fn new(
        address: &str,
        port: u16,
        database: &str,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url(address, port)?;

        Ok(Self {
            client,
            base_url,
            database: database.to_string(),
            credentials: credentials.filter(|(user, _)| !user.is_empty()),
        })
    }

    /// Format the write endpoint URL
    fn write_url(&self) -> String {
        format!("{}/write", self.base_url)
    }
}

impl MetricSink for InfluxSink {
    fn write_points<'a>(
        &'a self,
        points: &'a [MetricPoint],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let body = encode_batch(points);
            if body.is_empty() {
                debug!("No points to write");
                return Ok(());
            }

            let mut request = self
                .client
                .post(self.write_url())
                .query(&[("db", self.database.as_str()), ("precision", "ns")])
                .body(body);

            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, Some(password));
            }

            let response = request
                .send()
                .await
                .map_err(|e| SinkError::HttpError(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(SinkError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            debug!("Wrote {} points to {}", points.len(), self.database);
            Ok(())
        })
    }
}

/// Normalize `address` into a base URL that always names a port
fn base_url(address: &str, port: u16) -> Result<String, SinkError> {
    let address = address.trim_end_matches('/');
    let with_scheme = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| {
        SinkError::HttpError(format!("Invalid InfluxDB address '{}': {}", address, e))
    })?;
    if url.port().is_none() {
        url.set_port(Some(port))
            .map_err(|_| SinkError::HttpError(format!("Cannot set a port on '{}'", address)))?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Encode a batch as line protocol, one line per point
///
/// Points that cannot be represented (no usable field) are dropped with a
/// warning.
pub fn encode_batch(points: &[MetricPoint]) -> String {
    points
        .iter()
        .filter_map(|point| {
            let line = encode_point(point);
            if line.is_none() {
                warn!("Dropping {} point without fields", point.measurement);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Encode one point, `None` if it has no field line protocol can carry
pub fn encode_point(point: &MetricPoint) -> Option<String> {
    let fields = point
        .fields
        .iter()
        .filter_map(|(key, value)| {
            encode_field_value(value).map(|v| format!("{}={}", escape_key(key), v))
        })
        .collect::<Vec<_>>();

    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&point.measurement);
    for (key, value) in &point.tags {
        let value = value.to_string();
        // Line protocol has no empty tag values
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(&value));
    }

    line.push(' ');
    line.push_str(&fields.join(","));

    if let Some(nanos) = point.timestamp.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&nanos.to_string());
    }

    Some(line)
}

fn encode_field_value(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Integer(i) => Some(format!("{}i", i)),
        FieldValue::Float(f) if f.is_finite() => Some(f.to_string()),
        FieldValue::Float(_) => None,
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::Text(s) => Some(format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"")
        )),
    }
}

// Line protocol cannot carry line breaks outside string fields
fn without_line_breaks(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn escape_measurement(name: &str) -> String {
    without_line_breaks(name)
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

fn escape_key(key: &str) -> String {
    without_line_breaks(key)
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
