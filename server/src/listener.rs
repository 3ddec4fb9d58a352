//! TCP accept loop for device connections

use crate::hub::Hub;
use crate::registry::{DeviceConnection, DeviceTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Accepts device connections and runs one task per connection
pub struct DeviceListener {
    listener: TcpListener,
    hub: Arc<Hub>,
    write_timeout: Duration,
}

impl DeviceListener {
    pub async fn bind(addr: &str, hub: Arc<Hub>, write_timeout: Duration) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hub,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever. A failed accept is logged and does not stop the loop.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "listening for devices");
        }

        loop {
            let (socket, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            debug!(peer = %addr, "device connection accepted");
            let hub = self.hub.clone();
            let write_timeout = self.write_timeout;
            tokio::spawn(async move {
                handle_device(hub, socket, addr, write_timeout).await;
            });
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Drive one device connection until it closes
async fn handle_device(hub: Arc<Hub>, socket: TcpStream, addr: SocketAddr, write_timeout: Duration) {
    let mut conn = DeviceConnection::new(socket, addr, write_timeout);
    let transport: Arc<dyn DeviceTransport> = conn.handle();
    let mut registered: Option<String> = None;

    while let Some(message) = conn.recv().await {
        hub.on_device_message(&transport, &mut registered, message).await;
    }

    if registered.is_none() {
        warn!(peer = %addr, "connection closed without registering");
    } else {
        debug!(peer = %addr, "device connection closed");
    }

    transport.close().await;
    hub.device_disconnected(transport.connection_id()).await;
}
