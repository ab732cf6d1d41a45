//! Broadcast UDP socket handling.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::{debug, error, warn};

use super::Transport;
use crate::config::NetworkConfig;
use crate::error::{AppError, Result};

/// Largest datagram we expect from a device.
const RECV_BUFFER_SIZE: usize = 2048;

/// Pause after a failed receive before listening again.
const RECV_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Consecutive receive failures that end an exchange.
const MAX_RECV_ERRORS: u32 = 5;

/// Opens a fresh broadcast socket for every exchange and closes it on return.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    bind_addr: SocketAddr,
    target: SocketAddr,
    send_delay: Duration,
}

impl UdpTransport {
    /// Create a transport.
    ///
    /// # Arguments
    /// * `bind_addr` - Local address, usually `0.0.0.0:11530`
    /// * `target` - Broadcast destination, usually `255.255.255.255:11530`
    /// * `send_delay` - Time given to the OS to emit a fire-and-forget datagram
    pub fn new(bind_addr: SocketAddr, target: SocketAddr, send_delay: Duration) -> Self {
        Self {
            bind_addr,
            target,
            send_delay,
        }
    }

    pub fn from_config(network: &NetworkConfig) -> Self {
        Self::new(
            network.bind_socket_addr(),
            network.broadcast_socket_addr(),
            network.send_delay(),
        )
    }

    /// Bind a non-blocking broadcast socket. Address reuse lets several devices'
    /// exchanges share the well-known port.
    fn open(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(self.bind_addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| socket_error("create", e))?;
        socket.set_reuse_address(true).map_err(|e| socket_error("configure", e))?;
        // BSD-derived stacks only share a bound port between sockets that all set SO_REUSEPORT.
        #[cfg(all(
            unix,
            not(any(target_os = "linux", target_os = "android", target_os = "solaris", target_os = "illumos"))
        ))]
        socket.set_reuse_port(true).map_err(|e| socket_error("configure", e))?;
        socket.set_broadcast(true).map_err(|e| socket_error("enable broadcast on", e))?;
        socket.set_nonblocking(true).map_err(|e| socket_error("configure", e))?;
        socket
            .bind(&self.bind_addr.into())
            .map_err(|e| AppError::transport(format!("Failed to bind {}: {e}", self.bind_addr)))?;

        UdpSocket::from_std(socket.into()).map_err(|e| socket_error("register", e))
    }

    async fn transmit(&self, socket: &UdpSocket, frame: &[u8]) -> Result<()> {
        debug!("TX {} bytes to {}: {:02X?}", frame.len(), self.target, frame);
        socket.send_to(frame, self.target).await.map_err(|e| {
            error!("Send to {} failed: {e}", self.target);
            AppError::transport(format!("Send to {} failed: {e}", self.target))
        })?;
        Ok(())
    }
}

/// Tracks receive failures within one listen window.
#[derive(Debug, Default)]
struct RecvErrors {
    consecutive: u32,
}

impl RecvErrors {
    /// Count a failure. Fails once `MAX_RECV_ERRORS` arrive without a datagram in between.
    fn record(&mut self, e: &std::io::Error) -> Result<()> {
        self.consecutive += 1;
        if self.consecutive >= MAX_RECV_ERRORS {
            error!("Receive failed {} times in a row: {e}", self.consecutive);
            return Err(AppError::transport(format!(
                "Receive failed {} times in a row: {e}",
                self.consecutive
            )));
        }
        warn!("Receive failed: {e}");
        Ok(())
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

fn socket_error(action: &str, e: std::io::Error) -> AppError {
    error!("Failed to {action} UDP socket: {e}");
    AppError::transport(format!("Failed to {action} UDP socket: {e}"))
}

impl Transport for UdpTransport {
    async fn send_and_await<F, R>(&self, frame: &[u8], wait: Duration, mut on_datagram: F) -> Result<Option<R>>
    where
        F: FnMut(&[u8], SocketAddr) -> Option<R> + Send,
        R: Send,
    {
        let socket = self.open()?;
        self.transmit(&socket, frame).await?;

        let deadline = Instant::now() + wait;
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut errors = RecvErrors::default();

        loop {
            match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => {
                    debug!("Listen window of {wait:?} elapsed");
                    return Ok(None);
                }
                Ok(Ok((len, from))) => {
                    errors.reset();
                    debug!("RX {len} bytes from {from}: {:02X?}", &buf[..len]);
                    if let Some(reply) = on_datagram(&buf[..len], from) {
                        return Ok(Some(reply));
                    }
                }
                // ICMP errors surface here on some platforms; keep listening.
                Ok(Err(e)) => {
                    errors.record(&e)?;
                    sleep_until(deadline.min(Instant::now() + RECV_ERROR_PAUSE)).await;
                }
            }
        }
    }

    async fn send_only(&self, frame: &[u8]) -> Result<()> {
        let socket = self.open()?;
        self.transmit(&socket, frame).await?;
        sleep(self.send_delay).await;
        Ok(())
    }
}
