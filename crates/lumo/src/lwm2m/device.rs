// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Managed device node.
//!
//! Registers its object set with the management server, keeps the
//! registration alive and serves object reads, creates, executes, deletes
//! and observations. Observers are keyed by the path they observed; a change
//! below that path notifies them.

use super::link::format_links;
use super::object::{Action, ObjectStore, ReadValue, Target};
use super::objects::{
    FactoryObject, LocationObject, SecurityInstance, ServerInstance, LOCATION_OBJECT,
    SECURITY_OBJECT, SERVER_OBJECT,
};
use super::DeviceEvent;
use crate::codec::tlv;
use crate::config::DeviceConfig;
use crate::error::{Operation, RequestError};
use crate::event_loop::TimerGuard;
use crate::message::{
    ContentFormat, Message, Method, Observe, Request, ResourcePath, Response, Status, Token,
    TokenSource,
};
use crate::runtime::{Context, Node};
use crate::subscription::SubscriptionManager;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registration directory on the management server.
pub const REGISTRATION_PATH: &str = "/rd";

/// Where the device stands with the management server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// Registration request in flight.
    Registering(Token),
    /// Registered; updates go to `location`.
    Registered { location: ResourcePath },
}

/// Outcome of one served request.
struct Served {
    response: Response,
    changed: Vec<ResourcePath>,
    action: Action,
}

impl Served {
    fn reply(response: Response) -> Self {
        Self {
            response,
            changed: Vec::new(),
            action: Action::None,
        }
    }
}

/// The managed device node.
pub struct Device {
    endpoint_name: String,
    server: SocketAddr,
    lifetime_secs: u64,
    update_interval: Duration,
    store: ObjectStore,
    subscriptions: SubscriptionManager,
    tokens: TokenSource,
    state: RegistrationState,
    pending_update: Option<Token>,
    update_timer: Option<TimerGuard>,
}

impl Device {
    /// Build the device with its security and server instances in place.
    pub fn new(config: &DeviceConfig) -> Result<Self, RequestError> {
        let mut store = ObjectStore::new();
        store.register(Box::new(FactoryObject::new(SECURITY_OBJECT)))?;
        store.register(Box::new(FactoryObject::new(SERVER_OBJECT)))?;
        store.register(Box::new(LocationObject::new(config.location_tick())))?;

        store.insert(
            SECURITY_OBJECT,
            0,
            Box::new(SecurityInstance {
                server_uri: config.server_uri(),
                short_server_id: config.short_server_id,
            }),
        )?;
        store.insert(
            SERVER_OBJECT,
            0,
            Box::new(ServerInstance {
                short_server_id: config.short_server_id,
                lifetime_secs: i64::try_from(config.lifetime_secs).unwrap_or(i64::MAX),
                binding: config.binding.clone(),
            }),
        )?;

        Ok(Self {
            endpoint_name: config.endpoint_name.clone(),
            server: config.server,
            lifetime_secs: config.lifetime_secs,
            update_interval: config.update_interval(),
            store,
            subscriptions: SubscriptionManager::new(config.retry_budget),
            tokens: TokenSource::new(),
            state: RegistrationState::Unregistered,
            pending_update: None,
            update_timer: None,
        })
    }

    pub fn registration(&self) -> &RegistrationState {
        &self.state
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    fn links_payload(&self) -> Vec<u8> {
        format_links(&self.store.links()).into_bytes()
    }

    /// Send the registration request.
    pub fn register(&mut self, ctx: &mut Context<'_, DeviceEvent>) {
        let token = self.tokens.next_token();
        let request = Request::new(Method::Post, REGISTRATION_PATH, token)
            .with_query("ep", &self.endpoint_name)
            .with_query("lt", self.lifetime_secs)
            .with_query("b", "U")
            .with_payload(ContentFormat::LinkFormat, self.links_payload());

        info!("Registering {} with {}", self.endpoint_name, self.server);
        self.update_timer = None;
        self.pending_update = None;
        self.state = RegistrationState::Registering(token);
        ctx.send(self.server, request);
    }

    /// Refresh the registration, announcing the current object set.
    pub fn send_update(&mut self, ctx: &mut Context<'_, DeviceEvent>) {
        let RegistrationState::Registered { location } = &self.state else {
            debug!("Registration update skipped: not registered");
            return;
        };
        let token = self.tokens.next_token();
        let request = Request::new(Method::Post, location.clone(), token)
            .with_payload(ContentFormat::LinkFormat, self.links_payload());
        debug!("Registration update to {}", location);
        self.pending_update = Some(token);
        ctx.send(self.server, request);
    }

    fn on_response(&mut self, from: SocketAddr, response: Response, ctx: &mut Context<'_, DeviceEvent>) {
        if self.state == RegistrationState::Registering(response.token) {
            match (response.status, response.location) {
                (Status::Created, Some(location)) => {
                    info!("Registered as {}", location);
                    self.state = RegistrationState::Registered { location };
                    self.update_timer = Some(
                        ctx.handle
                            .arm_periodic(self.update_interval, DeviceEvent::RegistrationUpdate),
                    );
                }
                (status, _) => {
                    warn!("Registration rejected by {}: {}", from, status);
                    self.state = RegistrationState::Unregistered;
                }
            }
            return;
        }

        if self.pending_update == Some(response.token) {
            self.pending_update = None;
            match response.status {
                Status::NotFound => {
                    warn!("Registration unknown to {}, registering again", from);
                    self.register(ctx);
                }
                status if status.is_success() => debug!("Registration update acknowledged"),
                status => warn!("Registration update failed: {}", status),
            }
            return;
        }

        debug!("Ignoring response {} from {}", response.token, from);
    }

    /// Encode the current value at `target` as TLV.
    fn encode(&self, target: Target) -> Result<Vec<u8>, RequestError> {
        let payload = match self.store.read(target)? {
            ReadValue::Object(instances) => tlv::encode_instances(&instances)?,
            ReadValue::Instance(properties) => tlv::encode(&properties)?,
            ReadValue::Resource(property) => tlv::encode(&[property])?,
        };
        Ok(payload)
    }

    fn serve(&mut self, from: SocketAddr, request: &Request, ctx: &mut Context<'_, DeviceEvent>) -> Result<Served, RequestError> {
        let target = Target::parse(&request.path)?;
        let path = target.path();

        match (request.method, target) {
            (Method::Get, _) => {
                let payload = self.encode(target)?;
                let mut response = request
                    .reply(Status::Content)
                    .with_payload(ContentFormat::Tlv, payload);
                match request.observe {
                    Some(Observe::Register) => {
                        self.subscriptions.subscribe(&path, from, request.token);
                        response = response.with_sequence(self.subscriptions.sequence(&path));
                    }
                    Some(Observe::Deregister) => {
                        self.subscriptions.unsubscribe(&path, from);
                    }
                    None => {}
                }
                Ok(Served::reply(response))
            }
            (Method::Post, Target::Object(object)) => {
                let properties = tlv::decode(&request.payload)?;
                let instance = self
                    .store
                    .create(object, None, &properties, ctx.handle)?;
                let location = Target::Instance(object, instance).path();
                info!("Created {}", location);
                Ok(Served {
                    response: request.reply(Status::Created).with_location(location),
                    changed: vec![path],
                    action: Action::RegistrationUpdate,
                })
            }
            (Method::Post, Target::Resource(..)) => {
                let action = self.store.execute(target, &request.payload)?;
                Ok(Served {
                    response: request.reply(Status::Changed),
                    changed: Vec::new(),
                    action,
                })
            }
            (Method::Delete, Target::Instance(object, instance)) => {
                self.store.delete(object, instance)?;
                self.subscriptions.remove_subtree(&path);
                info!("Deleted {}", path);
                Ok(Served {
                    response: request.reply(Status::Deleted),
                    changed: vec![Target::Object(object).path()],
                    action: Action::RegistrationUpdate,
                })
            }
            (Method::Delete, _) => Err(RequestError::MethodNotAllowed {
                path,
                operation: Operation::Delete,
            }),
            (Method::Post, Target::Instance(..)) => Err(RequestError::MethodNotAllowed {
                path,
                operation: Operation::Execute,
            }),
            (Method::Put, _) => Err(RequestError::MethodNotAllowed {
                path,
                operation: Operation::Write,
            }),
        }
    }

    /// Answer a request and apply its effects.
    pub fn handle_request(&mut self, from: SocketAddr, request: Request, ctx: &mut Context<'_, DeviceEvent>) {
        let served = match self.serve(from, &request, ctx) {
            Ok(served) => served,
            Err(e) => {
                debug!("{:?} {} from {} rejected: {}", request.method, request.path, from, e);
                Served::reply(request.reply(e.status()))
            }
        };

        debug!("{:?} {} from {} -> {}", request.method, request.path, from, served.response.status);
        ctx.send(from, served.response);
        self.notify_changed(&served.changed, ctx);
        if served.action == Action::RegistrationUpdate {
            self.send_update(ctx);
        }
    }

    /// Notify every observer whose path covers one of `changed`, once each.
    fn notify_changed(&mut self, changed: &[ResourcePath], ctx: &mut Context<'_, DeviceEvent>) {
        let mut observed: Vec<ResourcePath> = Vec::new();
        for path in changed {
            for covering in self.subscriptions.paths_covering(path) {
                if !observed.contains(&covering) {
                    observed.push(covering);
                }
            }
        }

        for path in observed {
            let payload = match Target::parse(&path).and_then(|t| self.encode(t)) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Cannot notify {}: {}", path, e);
                    continue;
                }
            };
            let report = self.subscriptions.notify_all(
                &path,
                Status::Content,
                ContentFormat::Tlv,
                &payload,
                ctx.outbox,
            );
            debug!("Notified {} observers of {}", report.delivered, path);
        }
    }
}

impl Node for Device {
    type Event = DeviceEvent;

    fn start(&mut self, ctx: &mut Context<'_, DeviceEvent>) {
        self.register(ctx);
    }

    fn on_message(&mut self, from: SocketAddr, message: Message, ctx: &mut Context<'_, DeviceEvent>) {
        match message {
            Message::Request(request) => self.handle_request(from, request, ctx),
            Message::Response(response) => self.on_response(from, response, ctx),
            Message::Reset { token } => {
                if let Some(path) = self.subscriptions.reset(from, token) {
                    debug!("{} stopped observing {}", from, path);
                }
            }
            Message::Notification(n) => {
                debug!("Unexpected notification {} from {}", n.token, from);
                ctx.send(from, Message::Reset { token: n.token });
            }
        }
    }

    fn on_event(&mut self, event: DeviceEvent, ctx: &mut Context<'_, DeviceEvent>) {
        match event {
            DeviceEvent::Tick(serial) => {
                let changed = self.store.tick(serial);
                if changed.is_empty() {
                    debug!("Stale tick {}", serial);
                }
                self.notify_changed(&changed, ctx);
            }
            DeviceEvent::RegistrationUpdate => self.send_update(ctx),
        }
    }

    fn stop(&mut self) {
        self.update_timer = None;
        self.store.clear();
        self.subscriptions.clear();
        info!("Device {} stopped", self.endpoint_name);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("endpoint_name", &self.endpoint_name)
            .field("state", &self.state)
            .field("store", &self.store)
            .finish()
    }
}
