// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded node runtime over UDP.
//!
//! One task owns the node and the socket. Inbound datagrams, timer expiries
//! and external inputs are processed one at a time, each handler running to
//! completion before the next event is taken.

use crate::event_loop::LoopHandle;
use crate::message::Message;
use crate::transport::{Outbox, UdpOutbox};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// What a handler may touch while it runs.
pub struct Context<'a, E> {
    pub outbox: &'a mut dyn Outbox,
    pub handle: &'a LoopHandle<E>,
}

impl<'a, E: Send + 'static> Context<'a, E> {
    pub fn new(outbox: &'a mut dyn Outbox, handle: &'a LoopHandle<E>) -> Self {
        Self { outbox, handle }
    }

    /// Send and log a failure instead of propagating it.
    pub fn send(&mut self, to: SocketAddr, message: impl Into<Message>) -> bool {
        match self.outbox.send(to, message.into()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send to {} failed: {}", to, e);
                false
            }
        }
    }
}

/// An event-driven protocol role.
pub trait Node {
    /// Loop events: timer expiries and external inputs.
    type Event: Send + 'static;

    /// Called once before the first event.
    fn start(&mut self, _ctx: &mut Context<'_, Self::Event>) {}

    fn on_message(&mut self, from: SocketAddr, message: Message, ctx: &mut Context<'_, Self::Event>);

    fn on_event(&mut self, event: Self::Event, ctx: &mut Context<'_, Self::Event>);

    /// Called once on shutdown. Drop timers and observers here.
    fn stop(&mut self) {}
}

/// Runtime setup failure.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to join multicast group {group}: {source}")]
    Multicast {
        group: std::net::Ipv6Addr,
        source: std::io::Error,
    },

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Bind a UDP socket.
pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, NodeError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { addr, source })
}

/// Join an IPv6 multicast group on the default interface.
pub fn join_multicast(socket: &UdpSocket, group: std::net::Ipv6Addr) -> Result<(), NodeError> {
    socket
        .join_multicast_v6(&group, 0)
        .map_err(|source| NodeError::Multicast { group, source })
}

/// Runtime limits.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_datagram_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_datagram_size: crate::transport::DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

/// Drive `node` until `shutdown` is notified or the event channel closes.
///
/// Use `Notify::notify_one` to stop: the permit is kept even when the loop is
/// busy. The node is handed back after its `stop` hook ran.
pub async fn run<N>(
    socket: Arc<UdpSocket>,
    mut node: N,
    handle: LoopHandle<N::Event>,
    mut events: mpsc::UnboundedReceiver<N::Event>,
    shutdown: Arc<Notify>,
    options: RunOptions,
) -> Result<N, NodeError>
where
    N: Node,
{
    let local = socket.local_addr()?;
    let mut outbox = UdpOutbox::new(socket.clone(), options.max_datagram_size);
    let mut buf = vec![0u8; options.max_datagram_size];
    let mut received = 0u64;

    info!("Node running on {}", local);
    node.start(&mut Context::new(&mut outbox, &handle));

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                match event {
                    Some(event) => node.on_event(event, &mut Context::new(&mut outbox, &handle)),
                    None => {
                        debug!("Event channel closed");
                        break;
                    }
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => {
                        received += 1;
                        match Message::decode(&buf[..len]) {
                            Ok(message) => {
                                debug!("<- {} {} token {}", from, kind(&message), message.token());
                                node.on_message(from, message, &mut Context::new(&mut outbox, &handle));
                            }
                            Err(e) => warn!("Dropping undecodable datagram from {}: {}", from, e),
                        }
                    }
                    // ICMP errors surface here on some platforms; they are per-peer.
                    Err(e) => warn!("Receive error: {}", e),
                }
            }
            _ = shutdown.notified() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    node.stop();
    info!(
        "Node on {} stopped ({} datagrams in, {} out)",
        local,
        received,
        outbox.sent()
    );
    Ok(node)
}

fn kind(message: &Message) -> &'static str {
    match message {
        Message::Request(_) => "request",
        Message::Response(_) => "response",
        Message::Notification(_) => "notification",
        Message::Reset { .. } => "reset",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Method, Request, Token};

    /// Echoes every request back as a Reset and counts ticks.
    struct Echo {
        ticks: u32,
        stopped: bool,
    }

    impl Node for Echo {
        type Event = ();

        fn on_message(&mut self, from: SocketAddr, message: Message, ctx: &mut Context<'_, ()>) {
            ctx.send(from, Message::Reset { token: message.token() });
        }

        fn on_event(&mut self, _event: (), _ctx: &mut Context<'_, ()>) {
            self.ticks += 1;
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_and_stops() {
        let socket = Arc::new(bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (handle, rx) = LoopHandle::channel();
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(run(
            socket,
            Echo { ticks: 0, stopped: false },
            handle.clone(),
            rx,
            shutdown.clone(),
            RunOptions::default(),
        ));

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg: Message = Request::new(Method::Get, "/x", Token(3)).into();
        peer.send_to(&msg.encode().unwrap(), addr).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(
            Message::decode(&buf[..len]).unwrap(),
            Message::Reset { token: Token(3) }
        );

        // garbage is dropped, the loop keeps going
        peer.send_to(b"not json", addr).await.unwrap();
        handle.post(());
        handle.post(());

        peer.send_to(&msg.encode().unwrap(), addr).await.unwrap();
        peer.recv_from(&mut buf).await.unwrap();

        shutdown.notify_one();
        let echo = task.await.unwrap().unwrap();
        assert!(echo.stopped);
        assert_eq!(echo.ticks, 2);
    }

    #[tokio::test]
    async fn test_bind_error_reports_address() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let err = bind(addr).await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }
}
