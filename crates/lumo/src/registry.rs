// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side resource registry and request dispatch.
//!
//! Resources are looked up by exact path. Each one is a [`ResourceBehavior`]
//! advertising a [`Capabilities`] set; a request for an operation outside that
//! set is answered `MethodNotAllowed` without touching the resource.
//!
//! | Method             | Operation              |
//! |--------------------|------------------------|
//! | GET                | read                   |
//! | GET + observe      | read, then (un)subscribe |
//! | PUT                | write                  |
//! | POST               | execute                |
//! | DELETE             | delete                 |
//!
//! Dispatch never sends anything itself: it returns the reply plus an
//! [`Effect`] the owning node applies (fan-out, subscription changes).

use crate::codec::{self, text, tlv, Property, Schema};
use crate::error::{Operation, RequestError};
use crate::message::{ContentFormat, Method, Observe, Request, ResourcePath, Response, Status};
use std::collections::BTreeMap;
use std::ops::BitOr;

/// Subset of {read, write, execute, delete}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const EXECUTE: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn allows(self, operation: Operation) -> bool {
        self.contains(match operation {
            Operation::Read => Self::READ,
            Operation::Write => Self::WRITE,
            Operation::Execute => Self::EXECUTE,
            Operation::Delete => Self::DELETE,
        })
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Operations a registered resource implements.
///
/// Only operations listed in [`capabilities`](Self::capabilities) are ever
/// invoked by the registry.
pub trait ResourceBehavior: Send {
    fn capabilities(&self) -> Capabilities;

    /// Kind hints used when decoding written payloads.
    fn schema(&self) -> Option<&Schema> {
        None
    }

    /// Current value.
    fn read(&self) -> Vec<Property>;

    /// Apply a decoded write. Must leave the resource untouched on error.
    fn write(&mut self, _properties: &[Property]) -> Result<(), RequestError> {
        Err(RequestError::BadRequest("resource is not writable".into()))
    }

    /// Run the bound action; its status becomes the reply status.
    fn execute(&mut self, _arguments: &[u8]) -> Result<Status, RequestError> {
        Err(RequestError::BadRequest("resource is not executable".into()))
    }

    /// Release resource state before removal.
    fn delete(&mut self) {}
}

/// Side effect of a dispatched request, applied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Value written: notify every observer of this path.
    Changed(ResourcePath),
    /// Resource removed: drop its observers.
    Removed(ResourcePath),
    /// Add the requester as observer of this path.
    Subscribe(ResourcePath),
    /// Remove the requester's observation of this path.
    Unsubscribe(ResourcePath),
}

/// Outcome of [`ResourceRegistry::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub response: Response,
    pub effect: Effect,
}

impl Dispatch {
    fn reply(response: Response) -> Self {
        Self {
            response,
            effect: Effect::None,
        }
    }
}

/// Exposed resources, keyed by exact path.
pub struct ResourceRegistry {
    resources: BTreeMap<ResourcePath, Box<dyn ResourceBehavior>>,
    format: ContentFormat,
}

impl ResourceRegistry {
    /// Registry whose representations use `format` on the wire.
    pub fn new(format: ContentFormat) -> Self {
        Self {
            resources: BTreeMap::new(),
            format,
        }
    }

    pub fn format(&self) -> ContentFormat {
        self.format
    }

    /// Expose `behavior` at `path`. A path can be registered only once.
    pub fn register(
        &mut self,
        path: impl Into<ResourcePath>,
        behavior: Box<dyn ResourceBehavior>,
    ) -> Result<(), RequestError> {
        let path = path.into();
        if self.resources.contains_key(&path) {
            return Err(RequestError::AlreadyExists(path.to_string()));
        }
        tracing::debug!("Registered resource {}", path);
        self.resources.insert(path, behavior);
        Ok(())
    }

    /// Remove the resource at `path`, running its delete hook.
    pub fn remove(&mut self, path: &ResourcePath) -> bool {
        match self.resources.remove(path) {
            Some(mut behavior) => {
                behavior.delete();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.resources.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn lookup(&self, path: &ResourcePath, operation: Operation) -> Result<&dyn ResourceBehavior, RequestError> {
        let behavior = self
            .resources
            .get(path)
            .ok_or_else(|| RequestError::NotFound(path.clone()))?;
        if !behavior.capabilities().allows(operation) {
            return Err(RequestError::MethodNotAllowed {
                path: path.clone(),
                operation,
            });
        }
        Ok(behavior.as_ref())
    }

    fn lookup_mut(
        &mut self,
        path: &ResourcePath,
        operation: Operation,
    ) -> Result<&mut Box<dyn ResourceBehavior>, RequestError> {
        let behavior = self
            .resources
            .get_mut(path)
            .ok_or_else(|| RequestError::NotFound(path.clone()))?;
        if !behavior.capabilities().allows(operation) {
            return Err(RequestError::MethodNotAllowed {
                path: path.clone(),
                operation,
            });
        }
        Ok(behavior)
    }

    /// Current value of the resource at `path`.
    pub fn read(&self, path: &ResourcePath) -> Result<Vec<Property>, RequestError> {
        Ok(self.lookup(path, Operation::Read)?.read())
    }

    /// Encoded representation of the resource at `path`.
    pub fn encode(&self, path: &ResourcePath) -> Result<Vec<u8>, RequestError> {
        let properties = self.read(path)?;
        let bytes = match self.format {
            ContentFormat::Tlv => tlv::encode(&properties)?,
            _ => text::encode(Some(path), &properties)?,
        };
        Ok(bytes)
    }

    /// Apply already-decoded properties. Shared by remote writes and local triggers.
    pub fn write(&mut self, path: &ResourcePath, properties: &[Property]) -> Result<(), RequestError> {
        self.lookup_mut(path, Operation::Write)?.write(properties)
    }

    fn decode(&self, path: &ResourcePath, payload: &[u8]) -> Result<Vec<Property>, RequestError> {
        let schema = self.resources.get(path).and_then(|b| b.schema());
        let properties = match self.format {
            ContentFormat::Tlv => tlv::decode(payload)?,
            _ => text::decode_with_schema(payload, schema)?.properties,
        };
        Ok(properties)
    }

    /// Answer one inbound request.
    pub fn dispatch(&mut self, request: &Request) -> Dispatch {
        match self.try_dispatch(request) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                tracing::debug!("{:?} {} rejected: {}", request.method, request.path, e);
                Dispatch::reply(request.reply(e.status()))
            }
        }
    }

    fn try_dispatch(&mut self, request: &Request) -> Result<Dispatch, RequestError> {
        let path = &request.path;
        match request.method {
            Method::Get => {
                let body = self.encode(path)?;
                let response = request
                    .reply(Status::Content)
                    .with_payload(self.format, body);
                let effect = match request.observe {
                    Some(Observe::Register) => Effect::Subscribe(path.clone()),
                    Some(Observe::Deregister) => Effect::Unsubscribe(path.clone()),
                    None => Effect::None,
                };
                Ok(Dispatch { response, effect })
            }
            Method::Put => {
                self.lookup(path, Operation::Write)?;
                let properties = self.decode(path, &request.payload)?;
                self.write(path, &properties)?;
                tracing::debug!("Wrote {} ({} properties)", path, properties.len());
                Ok(Dispatch {
                    response: request.reply(Status::Changed),
                    effect: Effect::Changed(path.clone()),
                })
            }
            Method::Post => {
                let status = self
                    .lookup_mut(path, Operation::Execute)?
                    .execute(&request.payload)?;
                Ok(Dispatch::reply(request.reply(status)))
            }
            Method::Delete => {
                self.lookup(path, Operation::Delete)?;
                self.remove(path);
                Ok(Dispatch {
                    response: request.reply(Status::Deleted),
                    effect: Effect::Removed(path.clone()),
                })
            }
        }
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("paths", &self.resources.keys().collect::<Vec<_>>())
            .field("format", &self.format)
            .finish()
    }
}

/// Decode a required boolean property from written properties.
pub fn required_bool(properties: &[Property], name: &str) -> Result<bool, RequestError> {
    codec::find(properties, &name.into())
        .ok_or_else(|| RequestError::missing(name))?
        .as_bool()
        .ok_or_else(|| RequestError::BadRequest(format!("property {} is not a boolean", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Token;

    struct Switch {
        on: bool,
    }

    impl ResourceBehavior for Switch {
        fn capabilities(&self) -> Capabilities {
            Capabilities::READ | Capabilities::WRITE
        }

        fn read(&self) -> Vec<Property> {
            vec![Property::boolean("state", self.on)]
        }

        fn write(&mut self, properties: &[Property]) -> Result<(), RequestError> {
            self.on = required_bool(properties, "state")?;
            Ok(())
        }
    }

    struct Counter(u32);

    impl ResourceBehavior for Counter {
        fn capabilities(&self) -> Capabilities {
            Capabilities::READ | Capabilities::EXECUTE | Capabilities::DELETE
        }

        fn read(&self) -> Vec<Property> {
            vec![Property::integer("count", self.0 as i64)]
        }

        fn execute(&mut self, arguments: &[u8]) -> Result<Status, RequestError> {
            if arguments == b"fail" {
                return Err(RequestError::BadRequest("refused".into()));
            }
            self.0 += 1;
            Ok(Status::Changed)
        }
    }

    fn registry() -> ResourceRegistry {
        let mut reg = ResourceRegistry::new(ContentFormat::Text);
        reg.register("/a/switch", Box::new(Switch { on: false }))
            .unwrap();
        reg.register("/a/counter", Box::new(Counter(0))).unwrap();
        reg
    }

    fn put_state(payload: &[u8]) -> Request {
        Request::new(Method::Put, "/a/switch", Token(1)).with_payload(ContentFormat::Text, payload.to_vec())
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::READ | Capabilities::WRITE;
        assert!(caps.allows(Operation::Read));
        assert!(caps.allows(Operation::Write));
        assert!(!caps.allows(Operation::Execute));
        assert!(Capabilities::NONE.contains(Capabilities::NONE));
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut reg = registry();
        let err = reg
            .register("/a/switch", Box::new(Counter(0)))
            .unwrap_err();
        assert!(matches!(err, RequestError::AlreadyExists(_)));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_unknown_path_not_found() {
        let mut reg = registry();
        let d = reg.dispatch(&Request::new(Method::Get, "/a/nothing", Token(4)));
        assert_eq!(d.response.status, Status::NotFound);
        assert_eq!(d.response.token, Token(4));
        assert_eq!(d.effect, Effect::None);
    }

    #[test]
    fn test_missing_capability_method_not_allowed() {
        let mut reg = registry();
        let d = reg.dispatch(&Request::new(Method::Post, "/a/switch", Token(1)));
        assert_eq!(d.response.status, Status::MethodNotAllowed);
        let d = reg.dispatch(&Request::new(Method::Delete, "/a/switch", Token(1)));
        assert_eq!(d.response.status, Status::MethodNotAllowed);
        assert!(reg.contains(&ResourcePath::parse("/a/switch")));
    }

    #[test]
    fn test_read_returns_content() {
        let mut reg = registry();
        let d = reg.dispatch(&Request::new(Method::Get, "/a/switch", Token(1)));
        assert_eq!(d.response.status, Status::Content);
        assert_eq!(d.response.format, Some(ContentFormat::Text));
        let rep = text::decode(&d.response.payload).unwrap();
        assert_eq!(rep.properties, vec![Property::boolean("state", false)]);
    }

    #[test]
    fn test_observe_get_yields_subscribe_effect() {
        let mut reg = registry();
        let req = Request::new(Method::Get, "/a/switch", Token(1)).with_observe(Observe::Register);
        let d = reg.dispatch(&req);
        assert_eq!(d.effect, Effect::Subscribe(ResourcePath::parse("/a/switch")));
    }

    #[test]
    fn test_write_applies_and_reports_change() {
        let mut reg = registry();
        let d = reg.dispatch(&put_state(br#"{"oc":[{"rep":{"state":true}}]}"#));
        assert_eq!(d.response.status, Status::Changed);
        assert_eq!(d.effect, Effect::Changed(ResourcePath::parse("/a/switch")));

        let path = ResourcePath::parse("/a/switch");
        assert_eq!(reg.read(&path).unwrap(), vec![Property::boolean("state", true)]);

        // same value again still reports a change
        let d = reg.dispatch(&put_state(br#"{"oc":[{"rep":{"state":true}}]}"#));
        assert_eq!(d.effect, Effect::Changed(path));
    }

    #[test]
    fn test_write_missing_property_is_bad_request_without_mutation() {
        let mut reg = registry();
        let d = reg.dispatch(&put_state(br#"{"oc":[{"rep":{"power":1}}]}"#));
        assert_eq!(d.response.status, Status::BadRequest);
        assert_eq!(d.effect, Effect::None);

        let d = reg.dispatch(&put_state(b"garbage"));
        assert_eq!(d.response.status, Status::BadRequest);

        let path = ResourcePath::parse("/a/switch");
        assert_eq!(reg.read(&path).unwrap(), vec![Property::boolean("state", false)]);
    }

    #[test]
    fn test_execute_status_mapping() {
        let mut reg = registry();
        let d = reg.dispatch(&Request::new(Method::Post, "/a/counter", Token(1)));
        assert_eq!(d.response.status, Status::Changed);

        let req = Request::new(Method::Post, "/a/counter", Token(2)).with_payload(ContentFormat::Text, b"fail".to_vec());
        assert_eq!(reg.dispatch(&req).response.status, Status::BadRequest);
    }

    #[test]
    fn test_delete_removes_resource() {
        let mut reg = registry();
        let d = reg.dispatch(&Request::new(Method::Delete, "/a/counter", Token(1)));
        assert_eq!(d.response.status, Status::Deleted);
        assert_eq!(d.effect, Effect::Removed(ResourcePath::parse("/a/counter")));

        let d = reg.dispatch(&Request::new(Method::Get, "/a/counter", Token(2)));
        assert_eq!(d.response.status, Status::NotFound);
    }
}
