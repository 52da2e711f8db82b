// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registered device table for the management server.

use super::device::REGISTRATION_PATH;
use crate::message::ResourcePath;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Information about a registered device.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Registration id, last segment of the location
    pub id: u32,

    /// Endpoint name from the `ep` parameter
    pub name: String,

    /// Source address of the last registration or update
    pub address: SocketAddr,

    /// Lease length
    pub lifetime: Duration,

    /// Advertised object links
    pub objects: Vec<ResourcePath>,

    /// Last activity timestamp
    pub last_seen: Instant,

    /// Registration timestamp
    pub registered_at: Instant,
}

impl ClientInfo {
    pub fn new(id: u32, name: impl Into<String>, address: SocketAddr, lifetime: Duration, objects: Vec<ResourcePath>) -> Self {
        let now = Instant::now();
        Self {
            id,
            name: name.into(),
            address,
            lifetime,
            objects,
            last_seen: now,
            registered_at: now,
        }
    }

    /// Location handed back to the device (`/rd/<id>`).
    pub fn location(&self) -> ResourcePath {
        ResourcePath::parse(REGISTRATION_PATH).join(self.id.to_string())
    }

    /// Check if the lease has run out at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.lifetime
    }

    /// Update last seen timestamp.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Registry of all registered devices.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// Clients indexed by registration id
    clients: HashMap<u32, ClientInfo>,

    /// Name index: endpoint name -> registration id
    names: HashMap<String, u32>,

    next_id: u32,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration.
    ///
    /// A device registering again under the same name replaces its old entry,
    /// which is returned.
    pub fn register(
        &mut self,
        name: &str,
        address: SocketAddr,
        lifetime: Duration,
        objects: Vec<ResourcePath>,
    ) -> (u32, Option<ClientInfo>) {
        let replaced = self
            .names
            .get(name)
            .copied()
            .and_then(|id| self.remove(id));

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.names.insert(name.to_string(), id);
        self.clients
            .insert(id, ClientInfo::new(id, name, address, lifetime, objects));
        (id, replaced)
    }

    /// Refresh a registration. `None` when the id is unknown.
    pub fn update(
        &mut self,
        id: u32,
        address: SocketAddr,
        lifetime: Option<Duration>,
        objects: Option<Vec<ResourcePath>>,
    ) -> Option<&ClientInfo> {
        let info = self.clients.get_mut(&id)?;
        info.touch();
        info.address = address;
        if let Some(lifetime) = lifetime {
            info.lifetime = lifetime;
        }
        if let Some(objects) = objects {
            info.objects = objects;
        }
        Some(info)
    }

    /// Remove a registration.
    pub fn remove(&mut self, id: u32) -> Option<ClientInfo> {
        let info = self.clients.remove(&id)?;
        self.names.remove(&info.name);
        Some(info)
    }

    pub fn get(&self, id: u32) -> Option<&ClientInfo> {
        self.clients.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ClientInfo> {
        self.names.get(name).and_then(|id| self.clients.get(id))
    }

    /// Resolve an `/rd/<id>` location.
    pub fn get_by_location(&self, location: &ResourcePath) -> Option<&ClientInfo> {
        match location.segments() {
            [root, id] if format!("/{}", root) == REGISTRATION_PATH => {
                id.parse().ok().and_then(|id| self.clients.get(&id))
            }
            _ => None,
        }
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientInfo> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Remove expired registrations and return them.
    pub fn remove_expired(&mut self, now: Instant) -> Vec<ClientInfo> {
        let expired: Vec<u32> = self
            .clients
            .values()
            .filter(|info| info.is_expired(now))
            .map(|info| info.id)
            .collect();

        expired.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
