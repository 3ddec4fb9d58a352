//! Individual device connection handling

use async_trait::async_trait;
use relay_shared::codec::{self, FrameDecoder};
use relay_shared::{DeviceMessage, HubCommand};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TransportError;

/// Hub-assigned identity of one live transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0.simple())
    }
}

/// A live bidirectional channel to one device.
///
/// The core only ever sends commands through it or closes it.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    /// Identity of this transport, stable for its whole lifetime
    fn connection_id(&self) -> ConnectionId;

    /// Human-readable peer description for logs and status
    fn peer(&self) -> String;

    /// Write one command to the device
    async fn send(&self, command: &HubCommand) -> Result<(), TransportError>;

    /// Close the write side; the device observes EOF
    async fn close(&self);
}

/// Write side of a TCP device connection
pub struct TcpDeviceHandle {
    id: ConnectionId,
    addr: SocketAddr,
    writer: Mutex<WriteHalf<TcpStream>>,
    write_timeout: Duration,
}

#[async_trait]
impl DeviceTransport for TcpDeviceHandle {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.addr.to_string()
    }

    async fn send(&self, command: &HubCommand) -> Result<(), TransportError> {
        let encoded = codec::encode(command)?;
        // Holding the writer across the write keeps per-device commands in call order
        let mut writer = self.writer.lock().await;
        match timeout(self.write_timeout, writer.write_all(&encoded)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(self.write_timeout.as_millis() as u64)),
        }
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(conn = %self.id, error = %e, "shutdown on closed transport");
        }
    }
}

/// Read side of a device connection plus its shareable write handle
pub struct DeviceConnection {
    handle: Arc<TcpDeviceHandle>,
    reader: ReadHalf<TcpStream>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl DeviceConnection {
    /// Wrap an accepted TCP stream
    pub fn new(stream: TcpStream, addr: SocketAddr, write_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        let handle = Arc::new(TcpDeviceHandle {
            id: ConnectionId::new(),
            addr,
            writer: Mutex::new(writer),
            write_timeout,
        });

        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Get a cloneable handle for sending commands
    pub fn handle(&self) -> Arc<TcpDeviceHandle> {
        self.handle.clone()
    }

    /// Read the next message from the device.
    /// Returns None once the connection is closed or the stream is corrupt.
    pub async fn recv(&mut self) -> Option<DeviceMessage> {
        loop {
            match self.decoder.decode_next::<DeviceMessage>() {
                Ok(Some(message)) => return Some(message),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(peer = %self.handle.addr, error = %e, "skipping malformed frame");
                    continue;
                }
                Err(e) => {
                    warn!(peer = %self.handle.addr, error = %e, "unrecoverable decode error");
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    debug!(peer = %self.handle.addr, error = %e, "read error");
                    return None;
                }
            }
        }
    }

    /// Remote address of the device
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (DeviceConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (
            DeviceConnection::new(server, peer, Duration::from_secs(1)),
            client,
        )
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_recv_decodes_device_frames() {
        let (mut conn, mut client) = connected_pair().await;
        let frame = codec::encode(&DeviceMessage::Register {
            device_id: "A1".into(),
        })
        .unwrap();
        client.write_all(&frame).await.unwrap();

        let message = conn.recv().await.expect("message");
        assert_eq!(
            message,
            DeviceMessage::Register {
                device_id: "A1".into()
            }
        );

        drop(client);
        assert!(conn.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_handle_send_writes_frame() {
        let (conn, mut client) = connected_pair().await;
        let handle = conn.handle();
        handle.send(&HubCommand::shell("ping", 1)).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 1024];
        let command = loop {
            let n = client.read(&mut buf).await.unwrap();
            decoder.extend(&buf[..n]);
            if let Some(cmd) = decoder.decode_next::<HubCommand>().unwrap() {
                break cmd;
            }
        };
        assert_eq!(command, HubCommand::shell("ping", 1));
        assert_eq!(handle.peer(), conn.addr().to_string());
    }
}
