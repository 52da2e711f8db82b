// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Objects served by the device: security (0), server (1) and location (6).

use super::object::{Action, CreateContext, ObjectInstance, ObjectType};
use super::DeviceEvent;
use crate::codec::{find, Property, PropertyKind, PropertyValue, Schema};
use crate::error::RequestError;
use crate::event_loop::TimerGuard;
use crate::message::ResourcePath;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SECURITY_OBJECT: u16 = 0;
pub const SERVER_OBJECT: u16 = 1;
pub const LOCATION_OBJECT: u16 = 6;

pub const SECURITY_SERVER_URI: u16 = 0;
pub const SECURITY_BOOTSTRAP: u16 = 1;
pub const SECURITY_SHORT_SERVER_ID: u16 = 10;

pub const SERVER_SHORT_ID: u16 = 0;
pub const SERVER_LIFETIME: u16 = 1;
pub const SERVER_BINDING: u16 = 7;
pub const SERVER_REGISTRATION_UPDATE: u16 = 8;

pub const LOCATION_LATITUDE: u16 = 0;
pub const LOCATION_LONGITUDE: u16 = 1;
pub const LOCATION_TIMESTAMP: u16 = 5;

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Error for a resource id that the object does not serve.
///
/// Ids inside `defined` exist in the object definition but are not
/// implemented here; anything else is out of range.
fn unsupported(path: ResourcePath, resource_id: u16, defined: std::ops::RangeInclusive<u16>) -> RequestError {
    if defined.contains(&resource_id) {
        RequestError::NotFound(path.join(resource_id.to_string()))
    } else {
        RequestError::BadRequest(format!("{} has no resource {}", path, resource_id))
    }
}

/// Type entry for objects whose instances are built locally at startup.
#[derive(Debug, Clone, Copy)]
pub struct FactoryObject {
    id: u16,
}

impl FactoryObject {
    pub fn new(id: u16) -> Self {
        Self { id }
    }
}

impl ObjectType for FactoryObject {
    fn id(&self) -> u16 {
        self.id
    }

    fn max_instances(&self) -> Option<usize> {
        Some(1)
    }
}

/// Security object instance: how to reach the management server, no encryption.
#[derive(Debug, Clone)]
pub struct SecurityInstance {
    pub server_uri: String,
    pub short_server_id: i64,
}

impl ObjectInstance for SecurityInstance {
    fn read(&self, resource_id: u16) -> Result<Property, RequestError> {
        match resource_id {
            SECURITY_SERVER_URI => Ok(Property::string(resource_id, self.server_uri.clone())),
            SECURITY_BOOTSTRAP => Ok(Property::boolean(resource_id, false)),
            SECURITY_SHORT_SERVER_ID => Ok(Property::integer(resource_id, self.short_server_id)),
            other => Err(unsupported(ResourcePath::parse("/0/0"), other, 2..=11)),
        }
    }

    fn resource_ids(&self) -> Vec<u16> {
        vec![SECURITY_SERVER_URI, SECURITY_BOOTSTRAP, SECURITY_SHORT_SERVER_ID]
    }
}

/// Server object instance: registration parameters.
#[derive(Debug, Clone)]
pub struct ServerInstance {
    pub short_server_id: i64,
    pub lifetime_secs: i64,
    pub binding: String,
}

impl ObjectInstance for ServerInstance {
    fn read(&self, resource_id: u16) -> Result<Property, RequestError> {
        match resource_id {
            SERVER_SHORT_ID => Ok(Property::integer(resource_id, self.short_server_id)),
            SERVER_LIFETIME => Ok(Property::integer(resource_id, self.lifetime_secs)),
            SERVER_BINDING => Ok(Property::string(resource_id, self.binding.clone())),
            other => Err(unsupported(ResourcePath::parse("/1/0"), other, 2..=6)),
        }
    }

    fn resource_ids(&self) -> Vec<u16> {
        vec![SERVER_SHORT_ID, SERVER_LIFETIME, SERVER_BINDING]
    }

    fn execute(&mut self, resource_id: u16, _arguments: &[u8]) -> Result<Action, RequestError> {
        if resource_id != SERVER_REGISTRATION_UPDATE {
            return Err(RequestError::BadRequest(format!(
                "/1/0/{} is not executable",
                resource_id
            )));
        }
        Ok(Action::RegistrationUpdate)
    }
}

/// Location object type: a singleton created remotely.
#[derive(Debug, Clone)]
pub struct LocationObject {
    tick: Duration,
}

impl LocationObject {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

fn string_resource(properties: &[Property], id: u16) -> Result<String, RequestError> {
    find(properties, &id.into())
        .and_then(PropertyValue::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RequestError::BadRequest(format!("resource {} must be a string", id)))
}

impl ObjectType for LocationObject {
    fn id(&self) -> u16 {
        LOCATION_OBJECT
    }

    fn max_instances(&self) -> Option<usize> {
        Some(1)
    }

    fn schema(&self) -> Schema {
        Schema::new()
            .mandatory(LOCATION_LATITUDE, PropertyKind::String)
            .mandatory(LOCATION_LONGITUDE, PropertyKind::String)
            .mandatory(LOCATION_TIMESTAMP, PropertyKind::Time)
    }

    fn create(
        &self,
        instance_id: u16,
        properties: &[Property],
        ctx: &CreateContext<'_>,
    ) -> Result<Box<dyn ObjectInstance>, RequestError> {
        let latitude = string_resource(properties, LOCATION_LATITUDE)?;
        let longitude = string_resource(properties, LOCATION_LONGITUDE)?;
        let timestamp = find(properties, &LOCATION_TIMESTAMP.into())
            .and_then(PropertyValue::as_i64)
            .ok_or_else(|| RequestError::BadRequest("timestamp must be a time value".into()))?;

        let timer = ctx
            .handle
            .arm_periodic(self.tick, DeviceEvent::Tick(ctx.serial));

        tracing::debug!(
            "Location /6/{} created at {}, {}",
            instance_id,
            latitude,
            longitude
        );
        Ok(Box::new(LocationInstance {
            latitude,
            longitude,
            timestamp,
            _timer: timer,
        }))
    }

    fn deletable(&self) -> bool {
        true
    }
}

/// Simulated position fix, refreshed every tick.
#[derive(Debug)]
pub struct LocationInstance {
    latitude: String,
    longitude: String,
    timestamp: i64,
    _timer: TimerGuard,
}

impl LocationInstance {
    fn random_coordinate() -> String {
        format!("{:.6}", fastrand::f64())
    }
}

impl ObjectInstance for LocationInstance {
    fn read(&self, resource_id: u16) -> Result<Property, RequestError> {
        match resource_id {
            LOCATION_LATITUDE => Ok(Property::string(resource_id, self.latitude.clone())),
            LOCATION_LONGITUDE => Ok(Property::string(resource_id, self.longitude.clone())),
            LOCATION_TIMESTAMP => Ok(Property::time(resource_id, self.timestamp)),
            other => Err(unsupported(ResourcePath::parse("/6/0"), other, 2..=4)),
        }
    }

    fn resource_ids(&self) -> Vec<u16> {
        vec![LOCATION_LATITUDE, LOCATION_LONGITUDE, LOCATION_TIMESTAMP]
    }

    fn on_tick(&mut self) -> Vec<u16> {
        self.latitude = Self::random_coordinate();
        self.longitude = Self::random_coordinate();
        self.timestamp = unix_now();
        tracing::debug!("New latitude: {} - New longitude: {}", self.latitude, self.longitude);
        vec![LOCATION_LATITUDE, LOCATION_LONGITUDE, LOCATION_TIMESTAMP]
    }
}
