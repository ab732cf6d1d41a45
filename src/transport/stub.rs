//! Scripted transport for tests.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Transport;
use crate::error::{AppError, Result};

pub(crate) const DEVICE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)), 11530);

/// Outcome of one scripted exchange.
#[derive(Debug, Clone)]
pub(crate) enum Exchange {
    /// These datagrams arrive in order; unaccepted ones run into the timeout.
    Reply(Vec<Vec<u8>>),
    /// Nothing arrives before the timeout.
    Silence,
    /// The socket fails.
    Fail,
}

#[derive(Debug, Default)]
struct Inner {
    script: VecDeque<Exchange>,
    /// Used once the script runs out.
    fallback: Option<Exchange>,
    exchanges: Vec<Vec<u8>>,
    sent_only: Vec<Vec<u8>>,
}

/// Replays a script of exchanges and records every frame it is given.
#[derive(Debug, Clone, Default)]
pub(crate) struct StubTransport {
    inner: Arc<Mutex<Inner>>,
}

impl StubTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer every exchange the same way.
    pub(crate) fn always(exchange: Exchange) -> Self {
        let stub = Self::new();
        stub.inner.lock().unwrap().fallback = Some(exchange);
        stub
    }

    pub(crate) fn push(&self, exchange: Exchange) {
        self.inner.lock().unwrap().script.push_back(exchange);
    }

    /// Frames sent through `send_and_await`.
    pub(crate) fn exchanges(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().exchanges.clone()
    }

    /// Frames sent through `send_only`.
    pub(crate) fn sent_only(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent_only.clone()
    }
}

impl Transport for StubTransport {
    async fn send_and_await<F, R>(&self, frame: &[u8], wait: Duration, mut on_datagram: F) -> Result<Option<R>>
    where
        F: FnMut(&[u8], SocketAddr) -> Option<R> + Send,
        R: Send,
    {
        let exchange = {
            let mut inner = self.inner.lock().unwrap();
            inner.exchanges.push(frame.to_vec());
            inner
                .script
                .pop_front()
                .or_else(|| inner.fallback.clone())
                .unwrap_or(Exchange::Silence)
        };

        match exchange {
            Exchange::Fail => Err(AppError::transport("stub socket failure")),
            Exchange::Silence => {
                tokio::time::sleep(wait).await;
                Ok(None)
            }
            Exchange::Reply(datagrams) => {
                for datagram in datagrams {
                    if let Some(reply) = on_datagram(&datagram, DEVICE_ADDR) {
                        return Ok(Some(reply));
                    }
                }
                tokio::time::sleep(wait).await;
                Ok(None)
            }
        }
    }

    async fn send_only(&self, frame: &[u8]) -> Result<()> {
        self.inner.lock().unwrap().sent_only.push(frame.to_vec());
        Ok(())
    }
}
