// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Managed object model.
//!
//! An [`ObjectType`] describes one object id (its mandatory resources, how
//! many instances may exist, how to build an instance from a create payload).
//! An [`ObjectInstance`] owns its state and any timers it armed; dropping it
//! is the delete hook, so its timers die with it.

use super::DeviceEvent;
use crate::codec::{Property, Schema};
use crate::error::{Operation, RequestError};
use crate::event_loop::LoopHandle;
use crate::message::ResourcePath;
use std::collections::BTreeMap;

/// Side effect requested by an executed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Send a registration update now.
    RegistrationUpdate,
}

/// What an object type receives when an instance is created.
pub struct CreateContext<'a> {
    pub handle: &'a LoopHandle<DeviceEvent>,
    /// Tag for this instance's timer events.
    pub serial: u64,
}

/// Per-object behaviour.
pub trait ObjectType: Send {
    fn id(&self) -> u16;

    /// `Some(1)` for singleton objects.
    fn max_instances(&self) -> Option<usize> {
        None
    }

    /// Mandatory resources of a create payload.
    fn schema(&self) -> Schema {
        Schema::new()
    }

    /// Build an instance from a validated create payload.
    fn create(
        &self,
        _instance_id: u16,
        _properties: &[Property],
        _ctx: &CreateContext<'_>,
    ) -> Result<Box<dyn ObjectInstance>, RequestError> {
        Err(RequestError::MethodNotAllowed {
            path: ResourcePath::from_segments([self.id().to_string()]),
            operation: Operation::Write,
        })
    }

    /// Whether instances may be deleted remotely.
    fn deletable(&self) -> bool {
        false
    }
}

/// Per-instance behaviour.
pub trait ObjectInstance: Send {
    /// Read one resource. A defined but unimplemented id is `NotFound`; an id
    /// outside the object definition is `BadRequest`.
    fn read(&self, resource_id: u16) -> Result<Property, RequestError>;

    /// Readable resource ids, in order.
    fn resource_ids(&self) -> Vec<u16>;

    fn execute(&mut self, resource_id: u16, _arguments: &[u8]) -> Result<Action, RequestError> {
        Err(RequestError::BadRequest(format!(
            "resource {} is not executable",
            resource_id
        )))
    }

    /// Periodic timer tick. Returns the resource ids whose value changed.
    fn on_tick(&mut self) -> Vec<u16> {
        Vec::new()
    }
}

/// Resolved numeric path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Object(u16),
    Instance(u16, u16),
    Resource(u16, u16, u16),
}

impl Target {
    pub fn parse(path: &ResourcePath) -> Result<Self, RequestError> {
        let ids = path
            .numeric()
            .ok_or_else(|| RequestError::NotFound(path.clone()))?;
        match ids.as_slice() {
            [o] => Ok(Self::Object(*o)),
            [o, i] => Ok(Self::Instance(*o, *i)),
            [o, i, r] => Ok(Self::Resource(*o, *i, *r)),
            _ => Err(RequestError::BadRequest(format!("unsupported path {}", path))),
        }
    }

    pub fn object(self) -> u16 {
        match self {
            Self::Object(o) | Self::Instance(o, _) | Self::Resource(o, _, _) => o,
        }
    }

    pub fn path(self) -> ResourcePath {
        let ids: Vec<u16> = match self {
            Self::Object(o) => vec![o],
            Self::Instance(o, i) => vec![o, i],
            Self::Resource(o, i, r) => vec![o, i, r],
        };
        ResourcePath::from_segments(ids.iter().map(u16::to_string))
    }
}

/// Result of a read at object, instance or resource level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Object(Vec<(u16, Vec<Property>)>),
    Instance(Vec<Property>),
    Resource(Property),
}

struct InstanceEntry {
    serial: u64,
    instance: Box<dyn ObjectInstance>,
}

struct ObjectEntry {
    kind: Box<dyn ObjectType>,
    instances: BTreeMap<u16, InstanceEntry>,
}

/// All object types and live instances of a device.
#[derive(Default)]
pub struct ObjectStore {
    objects: BTreeMap<u16, ObjectEntry>,
    next_serial: u64,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object type. Each id may be registered once.
    pub fn register(&mut self, kind: Box<dyn ObjectType>) -> Result<(), RequestError> {
        let id = kind.id();
        if self.objects.contains_key(&id) {
            return Err(RequestError::AlreadyExists(format!("object {}", id)));
        }
        self.objects.insert(
            id,
            ObjectEntry {
                kind,
                instances: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn entry(&self, object: u16) -> Result<&ObjectEntry, RequestError> {
        self.objects
            .get(&object)
            .ok_or_else(|| RequestError::NotFound(Target::Object(object).path()))
    }

    fn entry_mut(&mut self, object: u16) -> Result<&mut ObjectEntry, RequestError> {
        self.objects
            .get_mut(&object)
            .ok_or_else(|| RequestError::NotFound(Target::Object(object).path()))
    }

    fn admit(entry: &ObjectEntry, object: u16, instance_id: u16) -> Result<(), RequestError> {
        if let Some(max) = entry.kind.max_instances() {
            if entry.instances.len() >= max {
                return Err(RequestError::AlreadyExists(format!(
                    "object {} allows {} instance(s)",
                    object, max
                )));
            }
        }
        if entry.instances.contains_key(&instance_id) {
            return Err(RequestError::AlreadyExists(
                Target::Instance(object, instance_id).path().to_string(),
            ));
        }
        Ok(())
    }

    fn take_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Install a locally built instance (factory objects).
    pub fn insert(&mut self, object: u16, instance_id: u16, instance: Box<dyn ObjectInstance>) -> Result<(), RequestError> {
        let serial = self.take_serial();
        let entry = self.entry_mut(object)?;
        Self::admit(entry, object, instance_id)?;
        entry.instances.insert(instance_id, InstanceEntry { serial, instance });
        Ok(())
    }

    /// Create an instance from a remote request.
    ///
    /// Without an explicit id the lowest free one is used. The singleton limit
    /// and mandatory resources are checked before the object type runs.
    pub fn create(
        &mut self,
        object: u16,
        instance_id: Option<u16>,
        properties: &[Property],
        handle: &LoopHandle<DeviceEvent>,
    ) -> Result<u16, RequestError> {
        let serial = self.next_serial + 1;
        let entry = self.entry(object)?;
        let instance_id = match instance_id {
            Some(id) => id,
            None => (0..=u16::MAX)
                .find(|id| !entry.instances.contains_key(id))
                .ok_or_else(|| RequestError::AllocationFailure(format!("object {} is full", object)))?,
        };
        Self::admit(entry, object, instance_id)?;
        entry
            .kind
            .schema()
            .require(properties)
            .map_err(RequestError::missing)?;

        let instance = entry
            .kind
            .create(instance_id, properties, &CreateContext { handle, serial })?;

        self.next_serial = serial;
        self.entry_mut(object)?
            .instances
            .insert(instance_id, InstanceEntry { serial, instance });
        Ok(instance_id)
    }

    /// Delete an instance; its timers are cancelled as it drops.
    pub fn delete(&mut self, object: u16, instance_id: u16) -> Result<(), RequestError> {
        let entry = self.entry_mut(object)?;
        if !entry.instances.contains_key(&instance_id) {
            return Err(RequestError::NotFound(Target::Instance(object, instance_id).path()));
        }
        if !entry.kind.deletable() {
            return Err(RequestError::MethodNotAllowed {
                path: Target::Instance(object, instance_id).path(),
                operation: Operation::Delete,
            });
        }
        entry.instances.remove(&instance_id);
        Ok(())
    }

    fn instance(&self, object: u16, instance_id: u16) -> Result<&dyn ObjectInstance, RequestError> {
        self.entry(object)?
            .instances
            .get(&instance_id)
            .map(|e| e.instance.as_ref())
            .ok_or_else(|| RequestError::NotFound(Target::Instance(object, instance_id).path()))
    }

    fn read_instance(instance: &dyn ObjectInstance) -> Vec<Property> {
        instance
            .resource_ids()
            .into_iter()
            .filter_map(|id| instance.read(id).ok())
            .collect()
    }

    /// Read at object, instance or resource level.
    pub fn read(&self, target: Target) -> Result<ReadValue, RequestError> {
        match target {
            Target::Object(object) => Ok(ReadValue::Object(
                self.entry(object)?
                    .instances
                    .iter()
                    .map(|(id, e)| (*id, Self::read_instance(e.instance.as_ref())))
                    .collect(),
            )),
            Target::Instance(object, instance_id) => Ok(ReadValue::Instance(Self::read_instance(
                self.instance(object, instance_id)?,
            ))),
            Target::Resource(object, instance_id, resource_id) => Ok(ReadValue::Resource(
                self.instance(object, instance_id)?.read(resource_id)?,
            )),
        }
    }

    pub fn execute(&mut self, target: Target, arguments: &[u8]) -> Result<Action, RequestError> {
        let Target::Resource(object, instance_id, resource_id) = target else {
            return Err(RequestError::MethodNotAllowed {
                path: target.path(),
                operation: Operation::Execute,
            });
        };
        self.entry_mut(object)?
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| RequestError::NotFound(Target::Instance(object, instance_id).path()))?
            .instance
            .execute(resource_id, arguments)
    }

    /// Deliver a timer tick to the instance created with `serial`.
    ///
    /// Returns the changed resource paths; empty when the instance is gone.
    pub fn tick(&mut self, serial: u64) -> Vec<ResourcePath> {
        for (object, entry) in self.objects.iter_mut() {
            for (instance_id, e) in entry.instances.iter_mut() {
                if e.serial == serial {
                    return e
                        .instance
                        .on_tick()
                        .into_iter()
                        .map(|r| Target::Resource(*object, *instance_id, r).path())
                        .collect();
                }
            }
        }
        Vec::new()
    }

    pub fn instance_count(&self, object: u16) -> usize {
        self.objects.get(&object).map(|e| e.instances.len()).unwrap_or(0)
    }

    /// Registration links: one per instance, or the bare object when empty.
    pub fn links(&self) -> Vec<ResourcePath> {
        let mut links = Vec::new();
        for (object, entry) in &self.objects {
            if entry.instances.is_empty() {
                links.push(Target::Object(*object).path());
            } else {
                links.extend(entry.instances.keys().map(|i| Target::Instance(*object, *i).path()));
            }
        }
        links
    }

    /// Drop every instance (shutdown).
    pub fn clear(&mut self) {
        for entry in self.objects.values_mut() {
            entry.instances.clear();
        }
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("links", &self.links())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PropertyKind;

    struct Note(String);

    impl ObjectInstance for Note {
        fn read(&self, resource_id: u16) -> Result<Property, RequestError> {
            match resource_id {
                0 => Ok(Property::string(0u16, self.0.clone())),
                1 => Err(RequestError::NotFound(ResourcePath::parse("/9/0/1"))),
                other => Err(RequestError::BadRequest(format!("no resource {}", other))),
            }
        }

        fn resource_ids(&self) -> Vec<u16> {
            vec![0]
        }
    }

    struct NoteType;

    impl ObjectType for NoteType {
        fn id(&self) -> u16 {
            9
        }

        fn max_instances(&self) -> Option<usize> {
            Some(1)
        }

        fn schema(&self) -> Schema {
            Schema::new().mandatory(0u16, PropertyKind::String)
        }

        fn create(
            &self,
            _instance_id: u16,
            properties: &[Property],
            _ctx: &CreateContext<'_>,
        ) -> Result<Box<dyn ObjectInstance>, RequestError> {
            let text = crate::codec::find(properties, &0u16.into())
                .and_then(|v| v.as_str())
                .ok_or_else(|| RequestError::missing(0))?;
            Ok(Box::new(Note(text.to_string())))
        }

        fn deletable(&self) -> bool {
            true
        }
    }

    fn store() -> ObjectStore {
        let mut store = ObjectStore::new();
        store.register(Box::new(NoteType)).unwrap();
        store
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(Target::parse(&"/6".into()).unwrap(), Target::Object(6));
        assert_eq!(Target::parse(&"/6/0/5".into()).unwrap(), Target::Resource(6, 0, 5));
        assert!(matches!(
            Target::parse(&"/rd/1".into()),
            Err(RequestError::NotFound(_))
        ));
        assert_eq!(Target::Instance(6, 0).path().to_string(), "/6/0");
    }

    #[tokio::test]
    async fn test_singleton_rejects_second_instance() {
        let (handle, _rx) = LoopHandle::channel();
        let mut store = store();

        let id = store
            .create(9, None, &[Property::string(0u16, "first")], &handle)
            .unwrap();
        assert_eq!(id, 0);

        let err = store
            .create(9, Some(1), &[Property::string(0u16, "second")], &handle)
            .unwrap_err();
        assert!(matches!(err, RequestError::AlreadyExists(_)));

        // existing instance untouched
        assert_eq!(
            store.read(Target::Resource(9, 0, 0)).unwrap(),
            ReadValue::Resource(Property::string(0u16, "first"))
        );
        assert_eq!(store.instance_count(9), 1);
    }

    #[tokio::test]
    async fn test_create_requires_mandatory_resources() {
        let (handle, _rx) = LoopHandle::channel();
        let mut store = store();
        let err = store.create(9, None, &[], &handle).unwrap_err();
        assert!(matches!(err, RequestError::BadRequest(_)));
        assert_eq!(store.instance_count(9), 0);
    }

    #[tokio::test]
    async fn test_read_levels_and_links() {
        let (handle, _rx) = LoopHandle::channel();
        let mut store = store();
        assert_eq!(store.links(), vec![ResourcePath::parse("/9")]);

        store
            .create(9, None, &[Property::string(0u16, "hi")], &handle)
            .unwrap();
        assert_eq!(store.links(), vec![ResourcePath::parse("/9/0")]);

        assert_eq!(
            store.read(Target::Object(9)).unwrap(),
            ReadValue::Object(vec![(0, vec![Property::string(0u16, "hi")])])
        );
        assert!(matches!(
            store.read(Target::Resource(9, 0, 1)),
            Err(RequestError::NotFound(_))
        ));
        assert!(matches!(
            store.read(Target::Resource(9, 0, 7)),
            Err(RequestError::BadRequest(_))
        ));
        assert!(matches!(
            store.read(Target::Object(3)),
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_frees_singleton_slot() {
        let (handle, _rx) = LoopHandle::channel();
        let mut store = store();
        store
            .create(9, None, &[Property::string(0u16, "a")], &handle)
            .unwrap();
        store.delete(9, 0).unwrap();
        assert!(matches!(store.delete(9, 0), Err(RequestError::NotFound(_))));
        assert!(store
            .create(9, None, &[Property::string(0u16, "b")], &handle)
            .is_ok());
    }

    #[test]
    fn test_execute_requires_resource_path() {
        let mut store = store();
        assert!(matches!(
            store.execute(Target::Object(9), &[]),
            Err(RequestError::MethodNotAllowed { .. })
        ));
    }
}
