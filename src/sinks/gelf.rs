use crate::error::SinkError;
use crate::events::LogEvent;
use crate::sinks::LogSink;
use chrono::Utc;
use log::debug;
use serde_json::json;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;

/// Datagram payload size used when none is configured
pub const DEFAULT_CHUNK_SIZE: usize = 1420;

/// Smallest accepted datagram payload size
pub const MIN_CHUNK_SIZE: usize = 128;

/// GELF limits a chunked message to this many chunks
pub const MAX_CHUNKS: usize = 128;

const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
const CHUNK_HEADER_LEN: usize = 12;

/// Graylog sink sending GELF 1.1 messages over UDP
///
/// Messages that do not fit in one datagram are split into GELF chunks.
pub struct GelfUdpSink {
    socket: UdpSocket,
    target: SocketAddr,
    source: String,
    chunk_size: usize,
    sequence: AtomicU64,
}

impl GelfUdpSink {
    /// Resolve the Graylog input and bind a local socket for it
    ///
    /// # Arguments
    ///
    /// * `address` - Graylog host name or IP address
    /// * `port` - GELF UDP input port
    /// * `source` - value of the GELF `host` field
    /// * `chunk_size` - largest datagram payload to send
    pub async fn connect(
        address: &str,
        port: u16,
        source: &str,
        chunk_size: usize,
    ) -> Result<Self, SinkError> {
        let target = tokio::net::lookup_host((address, port))
            .await?
            .next()
            .ok_or_else(|| {
                SinkError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address found for {}", address),
                ))
            })?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;

        debug!("GELF sink targeting {}", target);

        Ok(Self {
            socket,
            target,
            source: source.to_string(),
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
            sequence: AtomicU64::new(0),
        })
    }

    /// Resolved address of the Graylog input
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn next_message_id(&self) -> [u8; 8] {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        (nanos ^ sequence.rotate_left(48)).to_be_bytes()
    }
}

impl LogSink for GelfUdpSink {
    fn send<'a>(
        &'a self,
        event: &'a LogEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = encode_message(event, &self.source)?;
            let datagrams = split_into_chunks(&payload, self.chunk_size, self.next_message_id())?;

            for datagram in &datagrams {
                self.socket.send_to(datagram, self.target).await?;
            }
            Ok(())
        })
    }
}

/// Serialize one event as a GELF 1.1 message
pub fn encode_message(event: &LogEvent, source: &str) -> Result<Vec<u8>, SinkError> {
    let timestamp = event.timestamp.timestamp() as f64
        + f64::from(event.timestamp.timestamp_subsec_millis()) / 1000.0;

    let message = json!({
        "version": "1.1",
        "host": source,
        "short_message": event.message,
        "timestamp": timestamp,
        "level": event.severity.syslog_level(),
        "_user": event.user,
    });

    serde_json::to_vec(&message).map_err(|e| SinkError::Encode(e.to_string()))
}

/// Split a GELF payload into datagrams of at most `chunk_size` bytes
///
/// A payload that fits is sent as-is. Larger payloads become chunks carrying
/// the GELF chunk header: magic bytes, message id, sequence number and count.
pub fn split_into_chunks(
    payload: &[u8],
    chunk_size: usize,
    message_id: [u8; 8],
) -> Result<Vec<Vec<u8>>, SinkError> {
    if payload.len() <= chunk_size {
        return Ok(vec![payload.to_vec()]);
    }

    let data_len = chunk_size.saturating_sub(CHUNK_HEADER_LEN);
    if data_len == 0 {
        return Err(SinkError::Encode(format!(
            "chunk size {} leaves no room for data",
            chunk_size
        )));
    }

    let count = payload.len().div_ceil(data_len);
    if count > MAX_CHUNKS {
        return Err(SinkError::Encode(format!(
            "message of {} bytes needs {} chunks, limit is {}",
            payload.len(),
            count,
            MAX_CHUNKS
        )));
    }

    Ok(payload
        .chunks(data_len)
        .enumerate()
        .map(|(index, data)| {
            let mut datagram = Vec::with_capacity(CHUNK_HEADER_LEN + data.len());
            datagram.extend_from_slice(&CHUNK_MAGIC);
            datagram.extend_from_slice(&message_id);
            datagram.push(index as u8);
            datagram.push(count as u8);
            datagram.extend_from_slice(data);
            datagram
        })
        .collect())
}
