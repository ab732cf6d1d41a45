//! Per-device exclusive access to the transport.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use super::Transport;
use crate::error::Result;
use crate::protocol::{Command, DeviceAddress, encode_command};

/// One device's channel: the transport plus its outgoing package index.
///
/// Holding a [`LinkGuard`] is the only way to send, so a poll and a control
/// command for the same device never share the socket, and the package index
/// only advances under the lock.
#[derive(Debug)]
pub struct Link<T> {
    transport: T,
    package_index: Mutex<u16>,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self::with_package_index(transport, 0)
    }

    pub fn with_package_index(transport: T, package_index: u16) -> Self {
        Self {
            transport,
            package_index: Mutex::new(package_index),
        }
    }

    /// Wait for exclusive use of the link.
    pub async fn acquire(&self) -> LinkGuard<'_, T> {
        LinkGuard {
            transport: &self.transport,
            package_index: self.package_index.lock().await,
        }
    }
}

/// Exclusive access to a device link; released on drop.
pub struct LinkGuard<'a, T> {
    transport: &'a T,
    package_index: MutexGuard<'a, u16>,
}

impl<T: Transport> LinkGuard<'_, T> {
    /// Index the next assembled frame will carry.
    pub fn package_index(&self) -> u16 {
        *self.package_index
    }

    /// Build the frame for `command` and advance the package index.
    pub fn assemble(&mut self, address: &DeviceAddress, command: Command) -> Vec<u8> {
        let frame = encode_command(address, *self.package_index, &command.payload(address.device_type));
        *self.package_index = self.package_index.wrapping_add(1);
        frame
    }

    pub async fn send_and_await<F, R>(&self, frame: &[u8], wait: Duration, on_datagram: F) -> Result<Option<R>>
    where
        F: FnMut(&[u8], SocketAddr) -> Option<R> + Send,
        R: Send,
    {
        self.transport.send_and_await(frame, wait, on_datagram).await
    }

    pub async fn send_only(&self, frame: &[u8]) -> Result<()> {
        self.transport.send_only(frame).await
    }
}
