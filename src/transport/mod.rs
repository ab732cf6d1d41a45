//! UDP broadcast transport.
//!
//! The protocol has no connections and no request IDs: a command is broadcast
//! and any datagram arriving inside the listen window may be its reply. Each
//! device serializes its exchanges through a [`Link`], which also owns the
//! device's package index.

mod link;
mod udp;

#[cfg(test)]
pub(crate) mod stub;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;

pub use link::{Link, LinkGuard};
pub use udp::UdpTransport;

/// Sends frames and listens for replies.
pub trait Transport: Send + Sync {
    /// Send `frame`, then hand every received datagram to `on_datagram` until it
    /// returns `Some` or `wait` elapses. Returns `Ok(None)` on timeout.
    fn send_and_await<F, R>(
        &self,
        frame: &[u8],
        wait: Duration,
        on_datagram: F,
    ) -> impl Future<Output = Result<Option<R>>> + Send
    where
        F: FnMut(&[u8], SocketAddr) -> Option<R> + Send,
        R: Send;

    /// Send `frame` without listening for a reply.
    fn send_only(&self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;
}
