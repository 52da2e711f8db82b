// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # lumo - observable resources over UDP
//!
//! Building blocks for small constrained-network nodes: a property codec with
//! a textual and a TLV form, a resource registry with observe/notify, a
//! debounced actuator, and two pairs of ready-made roles:
//!
//! - light switching: [`light::LightServer`] exposes `/a/light`,
//!   [`light::LightSwitch`] discovers, observes and toggles it;
//! - device management: [`lwm2m::Device`] registers numbered objects with a
//!   [`lwm2m::ManagementServer`], whose monitors create and observe them.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------+
//! |  Roles (light server/switch, device, server)  |
//! +-----------------------------------------------+
//!        v  Node::on_message / on_event    ^
//! +-----------------------------------------------+
//! |  Registry / Subscriptions / ObjectStore       |
//! |  DebouncedActuator          Codec (text, TLV) |
//! +-----------------------------------------------+
//!        v  Context { outbox, handle }      ^
//! +-----------------------------------------------+
//! |  runtime::run: one task, one UDP socket,      |
//! |  one event channel (timers, button, stdin)    |
//! +-----------------------------------------------+
//! ```
//!
//! Nodes never block and never touch the socket: they send through an
//! [`transport::Outbox`] and arm timers through an [`event_loop::LoopHandle`].
//! That keeps every role testable without I/O.

#![deny(unsafe_code)]

/// Debounced boolean state and output sinks
pub mod actuator;

/// Property model, textual and TLV forms
pub mod codec;

/// Role configuration
pub mod config;

/// Request errors and their response statuses
pub mod error;

/// Loop handle and scoped timers
pub mod event_loop;

/// Light server and switch
pub mod light;

/// Device-management device, server and monitors
pub mod lwm2m;

/// Datagram envelope, paths and tokens
pub mod message;

/// Resource registry and request dispatch
pub mod registry;

/// UDP node runtime
pub mod runtime;

/// Observers and notification fan-out
pub mod subscription;

/// Outbound message delivery
pub mod transport;

// Re-exports for convenience
pub use crate::error::RequestError;
pub use crate::event_loop::{LoopHandle, TimerGuard};
pub use crate::message::{Message, ResourcePath, Status, Token};
pub use crate::runtime::{run, Context, Node, NodeError, RunOptions};
