// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound side of the transport collaborator.
//!
//! Handlers never block: every send is a non-blocking, fire-and-forget call
//! whose only synchronous result is whether the datagram could be handed to
//! the socket. Replies arrive later as independent events.

use crate::message::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Default datagram ceiling (IPv6 minimum MTU minus headers, rounded down).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1152;

/// A single send failed. Scoped to one destination, never fatal.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Datagram too large: {size} > {max}")]
    TooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Destination unreachable: {0}")]
    Unreachable(SocketAddr),
}

/// Sink for outbound messages.
pub trait Outbox: Send {
    fn send(&mut self, to: SocketAddr, message: Message) -> Result<(), DeliveryError>;
}

/// Outbox writing datagrams to a UDP socket with `try_send_to`.
#[derive(Debug, Clone)]
pub struct UdpOutbox {
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
    sent: u64,
}

impl UdpOutbox {
    pub fn new(socket: Arc<UdpSocket>, max_datagram_size: usize) -> Self {
        Self {
            socket,
            max_datagram_size,
            sent: 0,
        }
    }

    /// Datagrams handed to the socket so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Outbox for UdpOutbox {
    fn send(&mut self, to: SocketAddr, message: Message) -> Result<(), DeliveryError> {
        let bytes = message.encode()?;
        if bytes.len() > self.max_datagram_size {
            return Err(DeliveryError::TooLarge {
                size: bytes.len(),
                max: self.max_datagram_size,
            });
        }

        let written = self.socket.try_send_to(&bytes, to)?;
        if written != bytes.len() {
            return Err(DeliveryError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        self.sent += 1;
        tracing::trace!("-> {} {} bytes", to, written);
        Ok(())
    }
}

/// In-memory outbox that records every message.
///
/// Destinations listed in `unreachable` fail with
/// [`DeliveryError::Unreachable`]; used to exercise delivery failure paths.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    pub sent: Vec<(SocketAddr, Message)>,
    pub unreachable: Vec<SocketAddr>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&mut self) -> Vec<(SocketAddr, Message)> {
        std::mem::take(&mut self.sent)
    }
}

impl Outbox for RecordingOutbox {
    fn send(&mut self, to: SocketAddr, message: Message) -> Result<(), DeliveryError> {
        if self.unreachable.contains(&to) {
            return Err(DeliveryError::Unreachable(to));
        }
        self.sent.push((to, message));
        Ok(())
    }
}
