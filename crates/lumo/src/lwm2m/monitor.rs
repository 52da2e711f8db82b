// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration lifecycle monitors.
//!
//! The management server hands every lifecycle event, create result and
//! observed value to its monitors. [`LocationMonitor`] makes sure each
//! registered device carries a location instance and observes it.

use super::link::objects_from_links;
use super::object::Target;
use super::objects::{unix_now, LOCATION_LATITUDE, LOCATION_LONGITUDE, LOCATION_OBJECT, LOCATION_TIMESTAMP};
use super::registration::ClientInfo;
use super::server::ManagementOps;
use crate::codec::{find, tlv, CodecError, Property};
use crate::message::{ContentFormat, ResourcePath, Status};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Lifecycle event of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    Registered,
    Updated,
    Unregistered,
    TimedOut,
}

/// A value received for an observed path (observe ack or notification).
#[derive(Debug, Clone, Copy)]
pub struct ObservedValue<'a> {
    pub path: &'a ResourcePath,
    pub status: Status,
    pub format: Option<ContentFormat>,
    pub payload: &'a [u8],
}

/// Reacts to device lifecycle on the management server.
pub trait RegistrationMonitor: Send {
    fn on_registration(&mut self, event: RegistrationEvent, client: &ClientInfo, ops: &mut dyn ManagementOps);

    /// Reply to a create issued through [`ManagementOps`]; `Ok` carries the
    /// new instance path.
    fn on_create_result(
        &mut self,
        _client: &ClientInfo,
        _object: &ResourcePath,
        _result: Result<ResourcePath, Status>,
        _ops: &mut dyn ManagementOps,
    ) {
    }

    fn on_observation(&mut self, _client: &ClientInfo, _value: &ObservedValue<'_>) {}
}

/// How a device exposes the location object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationStatus {
    NotFound,
    FoundNoInstance,
    FoundWithInstance,
}

impl LocationStatus {
    /// Classify from registration links.
    pub fn classify(objects: &[ResourcePath]) -> Self {
        match objects_from_links(objects).get(&LOCATION_OBJECT) {
            None => Self::NotFound,
            Some(instances) if instances.is_empty() => Self::FoundNoInstance,
            Some(_) => Self::FoundWithInstance,
        }
    }
}

/// Last known position of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFix {
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub timestamp: Option<i64>,
}

impl LocationFix {
    fn apply(&mut self, properties: &[Property]) {
        if let Some(v) = find(properties, &LOCATION_LATITUDE.into()).and_then(|v| v.as_str()) {
            self.latitude = Some(v.to_owned());
        }
        if let Some(v) = find(properties, &LOCATION_LONGITUDE.into()).and_then(|v| v.as_str()) {
            self.longitude = Some(v.to_owned());
        }
        if let Some(v) = find(properties, &LOCATION_TIMESTAMP.into()).and_then(|v| v.as_i64()) {
            self.timestamp = Some(v);
        }
    }
}

/// Shared view of the positions a [`LocationMonitor`] received, by endpoint name.
#[derive(Debug, Clone, Default)]
pub struct FixLog {
    fixes: Arc<Mutex<HashMap<String, LocationFix>>>,
}

impl FixLog {
    pub fn get(&self, name: &str) -> Option<LocationFix> {
        self.fixes.lock().ok().and_then(|f| f.get(name).cloned())
    }

    pub fn len(&self) -> usize {
        self.fixes.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, name: &str, properties: &[Property]) -> Option<LocationFix> {
        let mut fixes = self.fixes.lock().ok()?;
        let fix = fixes.entry(name.to_string()).or_default();
        fix.apply(properties);
        Some(fix.clone())
    }

    fn forget(&self, name: &str) {
        if let Ok(mut fixes) = self.fixes.lock() {
            fixes.remove(name);
        }
    }
}

/// Creates a location instance on devices that lack one, then observes it.
#[derive(Debug)]
pub struct LocationMonitor {
    latitude: String,
    longitude: String,
    log: FixLog,
}

impl LocationMonitor {
    /// `latitude` and `longitude` fill the mandatory resources of a new instance.
    pub fn new(latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
            log: FixLog::default(),
        }
    }

    pub fn log(&self) -> FixLog {
        self.log.clone()
    }

    fn object_path() -> ResourcePath {
        Target::Object(LOCATION_OBJECT).path()
    }

    fn observe(&self, client: &ClientInfo, ops: &mut dyn ManagementOps) {
        let path = Self::object_path();
        match ops.observe(client, &path) {
            Ok(token) => debug!("Observing {} on {} (token {})", path, client.name, token),
            Err(e) => warn!("Cannot observe {} on {}: {}", path, client.name, e),
        }
    }

    fn create(&self, client: &ClientInfo, ops: &mut dyn ManagementOps) {
        let properties = [
            Property::string(LOCATION_LATITUDE, self.latitude.clone()),
            Property::string(LOCATION_LONGITUDE, self.longitude.clone()),
            Property::time(LOCATION_TIMESTAMP, unix_now()),
        ];
        match ops.create_object_instance(client, &Self::object_path(), &properties) {
            Ok(token) => debug!("Creating location on {} (token {})", client.name, token),
            Err(e) => warn!("Cannot create location on {}: {}", client.name, e),
        }
    }

    fn decode(value: &ObservedValue<'_>) -> Result<Vec<Property>, CodecError> {
        match Target::parse(value.path) {
            Ok(Target::Object(_)) => Ok(tlv::decode_instances(value.payload)?
                .into_iter()
                .next()
                .map(|(_, properties)| properties)
                .unwrap_or_default()),
            _ => tlv::decode(value.payload),
        }
    }
}

impl RegistrationMonitor for LocationMonitor {
    fn on_registration(&mut self, event: RegistrationEvent, client: &ClientInfo, ops: &mut dyn ManagementOps) {
        match event {
            RegistrationEvent::Registered => match LocationStatus::classify(&client.objects) {
                LocationStatus::NotFound => {
                    warn!("Client {} does not expose a location object", client.name)
                }
                LocationStatus::FoundNoInstance => self.create(client, ops),
                LocationStatus::FoundWithInstance => self.observe(client, ops),
            },
            RegistrationEvent::Updated => info!("Client {} updated its registration", client.name),
            RegistrationEvent::Unregistered => {
                info!("Client {} unregistered", client.name);
                self.log.forget(&client.name);
            }
            RegistrationEvent::TimedOut => {
                info!("Client {} timed out", client.name);
                self.log.forget(&client.name);
            }
        }
    }

    fn on_create_result(
        &mut self,
        client: &ClientInfo,
        object: &ResourcePath,
        result: Result<ResourcePath, Status>,
        ops: &mut dyn ManagementOps,
    ) {
        if *object != Self::object_path() {
            return;
        }
        match result {
            Ok(location) => {
                info!("Created {} on {}", location, client.name);
                self.observe(client, ops);
            }
            Err(status) => warn!("Location create on {} failed: {}", client.name, status),
        }
    }

    fn on_observation(&mut self, client: &ClientInfo, value: &ObservedValue<'_>) {
        if !matches!(value.status, Status::Changed | Status::Content) {
            debug!("Observation of {} on {} reported {}", value.path, client.name, value.status);
            return;
        }
        if value.format != Some(ContentFormat::Tlv) {
            debug!("Ignoring non-TLV observation from {}", client.name);
            return;
        }

        let properties = match Self::decode(value) {
            Ok(properties) => properties,
            Err(e) => {
                warn!("Undecodable location from {}: {}", client.name, e);
                return;
            }
        };

        if let Some(LocationFix {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..
        }) = self.log.update(&client.name, &properties)
        {
            info!("Client {} latitude: {} longitude: {}", client.name, latitude, longitude);
        }
    }
}
