// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device-management roles.
//!
//! A [`device::Device`] exposes numbered objects (`/<object>/<instance>/<resource>`)
//! and registers with a [`server::ManagementServer`]. The server keeps a lease
//! per registered device and hands lifecycle events to monitors, which may create
//! object instances on the device and observe them.
//!
//! ```text
//!  Device                              ManagementServer
//!    │  POST /rd?ep=..&lt=..  </0/0>,..  │
//!    ├───────────────────────────────────►│ ClientRegistry ─► RegistrationEvent
//!    │◄─────────────── 2.01 /rd/1 ────────┤                        │
//!    │◄──────── POST /6 (TLV) ────────────┤◄── ManagementOps ◄─ monitor
//!    │◄──────── GET /6 observe ───────────┤
//!    ├──── notify (every location tick) ─►│ ─► monitor.on_observation
//! ```

pub mod device;
pub mod link;
pub mod monitor;
pub mod object;
pub mod objects;
pub mod registration;
pub mod server;

pub use device::{Device, RegistrationState};
pub use monitor::{LocationMonitor, LocationStatus, RegistrationEvent, RegistrationMonitor};
pub use object::{Action, ObjectInstance, ObjectStore, ObjectType, ReadValue, Target};
pub use registration::{ClientInfo, ClientRegistry};
pub use server::{ManagementOps, ManagementServer, OpsError, ServerEvent};

/// Device loop events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Periodic tick for the object instance created with this serial.
    Tick(u64),
    /// Time to refresh the registration.
    RegistrationUpdate,
}
