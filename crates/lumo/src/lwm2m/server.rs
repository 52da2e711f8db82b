// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Management server node.
//!
//! Serves the registration directory (`/rd`), expires leases, and lets
//! monitors act on registered devices through [`ManagementOps`]. Replies and
//! notifications are matched to the originating operation by token.

use super::device::REGISTRATION_PATH;
use super::link::parse_links;
use super::monitor::{ObservedValue, RegistrationEvent, RegistrationMonitor};
use super::registration::{ClientInfo, ClientRegistry};
use crate::codec::{tlv, CodecError, Property};
use crate::config::{ManagementServerConfig, DEFAULT_LIFETIME_SECS};
use crate::error::{Operation, RequestError};
use crate::event_loop::TimerGuard;
use crate::message::{
    sequence_is_newer, ContentFormat, Message, Method, Notification, Observe, Request,
    ResourcePath, Response, Status, Token, TokenSource,
};
use crate::runtime::{Context, Node};
use crate::transport::DeliveryError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Failure of an operation requested by a monitor.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Cannot encode payload: {0}")]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Operations a monitor may issue against a registered device.
pub trait ManagementOps {
    /// `POST <object>` with a TLV payload. The reply arrives through
    /// [`RegistrationMonitor::on_create_result`].
    fn create_object_instance(
        &mut self,
        client: &ClientInfo,
        object: &ResourcePath,
        properties: &[Property],
    ) -> Result<Token, OpsError>;

    /// `GET <path>` with observe. Values arrive through
    /// [`RegistrationMonitor::on_observation`].
    fn observe(&mut self, client: &ClientInfo, path: &ResourcePath) -> Result<Token, OpsError>;
}

/// Management server loop events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    LeaseCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Create,
    Observe,
}

#[derive(Debug, Clone)]
struct Pending {
    client: u32,
    path: ResourcePath,
    kind: PendingKind,
    issued: Instant,
}

#[derive(Debug, Clone)]
struct Observation {
    client: u32,
    path: ResourcePath,
    last_sequence: u32,
}

/// [`ManagementOps`] bound to the server's token space for one handler run.
struct Ops<'a, 'b> {
    tokens: &'a mut TokenSource,
    pending: &'a mut HashMap<Token, Pending>,
    ctx: &'a mut Context<'b, ServerEvent>,
}

impl Ops<'_, '_> {
    fn issue(&mut self, client: &ClientInfo, request: Request, kind: PendingKind) -> Result<Token, OpsError> {
        let token = request.token;
        let path = request.path.clone();
        self.ctx.outbox.send(client.address, request.into())?;
        self.pending.insert(
            token,
            Pending {
                client: client.id,
                path,
                kind,
                issued: Instant::now(),
            },
        );
        Ok(token)
    }
}

impl ManagementOps for Ops<'_, '_> {
    fn create_object_instance(
        &mut self,
        client: &ClientInfo,
        object: &ResourcePath,
        properties: &[Property],
    ) -> Result<Token, OpsError> {
        let payload = tlv::encode(properties)?;
        let request = Request::new(Method::Post, object.clone(), self.tokens.next_token())
            .with_payload(ContentFormat::Tlv, payload);
        self.issue(client, request, PendingKind::Create)
    }

    fn observe(&mut self, client: &ClientInfo, path: &ResourcePath) -> Result<Token, OpsError> {
        let request = Request::new(Method::Get, path.clone(), self.tokens.next_token())
            .with_observe(Observe::Register);
        self.issue(client, request, PendingKind::Observe)
    }
}

/// The management server node.
pub struct ManagementServer {
    clients: ClientRegistry,
    monitors: Vec<Box<dyn RegistrationMonitor>>,
    tokens: TokenSource,
    pending: HashMap<Token, Pending>,
    observations: HashMap<Token, Observation>,
    lease_check: Duration,
    request_timeout: Duration,
    lease_timer: Option<TimerGuard>,
}

impl ManagementServer {
    pub fn new(config: &ManagementServerConfig) -> Self {
        Self {
            clients: ClientRegistry::new(),
            monitors: Vec::new(),
            tokens: TokenSource::new(),
            pending: HashMap::new(),
            observations: HashMap::new(),
            lease_check: config.lease_check(),
            request_timeout: config.request_timeout(),
            lease_timer: None,
        }
    }

    pub fn add_monitor(&mut self, monitor: Box<dyn RegistrationMonitor>) {
        self.monitors.push(monitor);
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Active observations across all clients.
    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    /// Operations still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn emit(&mut self, event: RegistrationEvent, client: &ClientInfo, ctx: &mut Context<'_, ServerEvent>) {
        let mut ops = Ops {
            tokens: &mut self.tokens,
            pending: &mut self.pending,
            ctx,
        };
        for monitor in self.monitors.iter_mut() {
            monitor.on_registration(event, client, &mut ops);
        }
    }

    /// Drop in-flight operations and observations of a departed client.
    fn forget(&mut self, client: u32) {
        self.pending.retain(|_, p| p.client != client);
        self.observations.retain(|_, o| o.client != client);
    }

    fn client_id(&self, path: &ResourcePath) -> Result<u32, RequestError> {
        self.clients
            .get_by_location(path)
            .map(|c| c.id)
            .ok_or_else(|| RequestError::NotFound(path.clone()))
    }

    fn lifetime(request: &Request) -> Result<Option<Duration>, RequestError> {
        request
            .query_value("lt")
            .map(|lt| {
                lt.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| RequestError::BadRequest(format!("invalid lifetime {:?}", lt)))
            })
            .transpose()
    }

    fn links(request: &Request) -> Result<Vec<ResourcePath>, RequestError> {
        let document = std::str::from_utf8(&request.payload).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(parse_links(document)?)
    }

    fn serve(
        &mut self,
        from: SocketAddr,
        request: &Request,
    ) -> Result<(Response, Option<(RegistrationEvent, ClientInfo)>), RequestError> {
        let root = ResourcePath::parse(REGISTRATION_PATH);
        if !request.path.starts_with(&root) {
            return Err(RequestError::NotFound(request.path.clone()));
        }

        match (request.method, request.path.segments().len()) {
            (Method::Post, 1) => {
                let name = request
                    .query_value("ep")
                    .filter(|ep| !ep.is_empty())
                    .ok_or_else(|| RequestError::BadRequest("missing endpoint name".into()))?;
                let lifetime = Self::lifetime(request)?
                    .unwrap_or(Duration::from_secs(DEFAULT_LIFETIME_SECS));
                let objects = Self::links(request)?;

                let (id, replaced) = self.clients.register(name, from, lifetime, objects);
                if let Some(old) = replaced {
                    info!("Client {} registered again, dropping {}", name, old.location());
                    self.forget(old.id);
                }
                let info = self
                    .clients
                    .get(id)
                    .cloned()
                    .ok_or_else(|| RequestError::AllocationFailure(format!("registration {} lost", id)))?;
                info!("Client {} registered at {} from {}", info.name, info.location(), from);
                Ok((
                    request.reply(Status::Created).with_location(info.location()),
                    Some((RegistrationEvent::Registered, info)),
                ))
            }
            (Method::Post, 2) => {
                let id = self.client_id(&request.path)?;
                let lifetime = Self::lifetime(request)?;
                let objects = if request.payload.is_empty() {
                    None
                } else {
                    Some(Self::links(request)?)
                };
                let info = self
                    .clients
                    .update(id, from, lifetime, objects)
                    .cloned()
                    .ok_or_else(|| RequestError::NotFound(request.path.clone()))?;
                debug!("Client {} updated", info.name);
                Ok((
                    request.reply(Status::Changed),
                    Some((RegistrationEvent::Updated, info)),
                ))
            }
            (Method::Delete, 2) => {
                let id = self.client_id(&request.path)?;
                let info = self
                    .clients
                    .remove(id)
                    .ok_or_else(|| RequestError::NotFound(request.path.clone()))?;
                self.forget(id);
                info!("Client {} deregistered", info.name);
                Ok((
                    request.reply(Status::Deleted),
                    Some((RegistrationEvent::Unregistered, info)),
                ))
            }
            (Method::Post | Method::Delete, _) => Err(RequestError::NotFound(request.path.clone())),
            (method, _) => Err(RequestError::MethodNotAllowed {
                path: request.path.clone(),
                operation: if method == Method::Get {
                    Operation::Read
                } else {
                    Operation::Write
                },
            }),
        }
    }

    /// Answer a registration request, then tell the monitors.
    pub fn handle_request(&mut self, from: SocketAddr, request: Request, ctx: &mut Context<'_, ServerEvent>) {
        let (response, event) = match self.serve(from, &request) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("{:?} {} from {} rejected: {}", request.method, request.path, from, e);
                (request.reply(e.status()), None)
            }
        };

        ctx.send(from, response);
        if let Some((event, client)) = event {
            self.emit(event, &client, ctx);
        }
    }

    fn on_response(&mut self, from: SocketAddr, response: Response, ctx: &mut Context<'_, ServerEvent>) {
        let Some(pending) = self.pending.remove(&response.token) else {
            debug!("Ignoring response {} from {}", response.token, from);
            return;
        };
        let Some(client) = self.clients.get(pending.client).cloned() else {
            debug!("Response {} for a departed client", response.token);
            return;
        };

        match pending.kind {
            PendingKind::Create => {
                let result = if response.status == Status::Created {
                    Ok(response.location.clone().unwrap_or_else(|| pending.path.clone()))
                } else {
                    Err(response.status)
                };
                let mut ops = Ops {
                    tokens: &mut self.tokens,
                    pending: &mut self.pending,
                    ctx,
                };
                for monitor in self.monitors.iter_mut() {
                    monitor.on_create_result(&client, &pending.path, result.clone(), &mut ops);
                }
            }
            PendingKind::Observe => {
                if !response.status.is_success() {
                    warn!("Observe {} on {} refused: {}", pending.path, client.name, response.status);
                    return;
                }
                self.observations.insert(
                    response.token,
                    Observation {
                        client: client.id,
                        path: pending.path.clone(),
                        last_sequence: response.sequence.unwrap_or(0),
                    },
                );
                info!("Observing {} on {}", pending.path, client.name);
                let value = ObservedValue {
                    path: &pending.path,
                    status: response.status,
                    format: response.format,
                    payload: &response.payload,
                };
                for monitor in self.monitors.iter_mut() {
                    monitor.on_observation(&client, &value);
                }
            }
        }
    }

    fn on_notification(&mut self, from: SocketAddr, notification: Notification, ctx: &mut Context<'_, ServerEvent>) {
        let token = notification.token;

        if let Some(observation) = self.observations.get_mut(&token) {
            let Some(client) = self.clients.get(observation.client) else {
                return;
            };
            if client.address != from {
                debug!("Observation {} belongs to {}, resetting {}", token, client.address, from);
                ctx.send(from, Message::Reset { token });
                return;
            }
            if !sequence_is_newer(observation.last_sequence, notification.sequence) {
                debug!(
                    "Dropping stale notification {} (last {})",
                    notification.sequence, observation.last_sequence
                );
                return;
            }
            observation.last_sequence = notification.sequence;

            let value = ObservedValue {
                path: &observation.path,
                status: notification.status,
                format: notification.format,
                payload: &notification.payload,
            };
            for monitor in self.monitors.iter_mut() {
                monitor.on_observation(client, &value);
            }
            return;
        }

        // Observe ack lost: the first notification confirms the observation.
        let promoted = self
            .pending
            .get(&token)
            .filter(|p| p.kind == PendingKind::Observe)
            .and_then(|p| self.clients.get(p.client))
            .is_some_and(|c| c.address == from);
        let pending = if promoted { self.pending.remove(&token) } else { None };
        let Some(pending) = pending else {
            debug!("Unknown observation {} from {}, resetting", token, from);
            ctx.send(from, Message::Reset { token });
            return;
        };
        let Some(client) = self.clients.get(pending.client) else {
            return;
        };

        info!("Observing {} on {} (first notification {})", pending.path, client.name, notification.sequence);
        self.observations.insert(
            token,
            Observation {
                client: client.id,
                path: pending.path.clone(),
                last_sequence: notification.sequence,
            },
        );
        let value = ObservedValue {
            path: &pending.path,
            status: notification.status,
            format: notification.format,
            payload: &notification.payload,
        };
        for monitor in self.monitors.iter_mut() {
            monitor.on_observation(client, &value);
        }
    }

    /// Drop operations whose reply never came.
    fn expire_pending(&mut self, now: Instant) {
        let timeout = self.request_timeout;
        self.pending.retain(|token, p| {
            let alive = now.saturating_duration_since(p.issued) < timeout;
            if !alive {
                warn!("{:?} {} (token {}) got no reply, giving up", p.kind, p.path, token);
            }
            alive
        });
    }

    /// Expire leases; each expired registration produces one `TimedOut`.
    pub fn check_leases(&mut self, ctx: &mut Context<'_, ServerEvent>) {
        let now = Instant::now();
        self.expire_pending(now);
        for client in self.clients.remove_expired(now) {
            info!("Client {} lease expired", client.name);
            self.forget(client.id);
            self.emit(RegistrationEvent::TimedOut, &client, ctx);
        }
    }
}

impl Node for ManagementServer {
    type Event = ServerEvent;

    fn start(&mut self, ctx: &mut Context<'_, ServerEvent>) {
        info!("Management server up, {} monitor(s)", self.monitors.len());
        self.lease_timer = Some(ctx.handle.arm_periodic(self.lease_check, ServerEvent::LeaseCheck));
    }

    fn on_message(&mut self, from: SocketAddr, message: Message, ctx: &mut Context<'_, ServerEvent>) {
        match message {
            Message::Request(request) => self.handle_request(from, request, ctx),
            Message::Response(response) => self.on_response(from, response, ctx),
            Message::Notification(notification) => self.on_notification(from, notification, ctx),
            Message::Reset { token } => {
                if self.observations.remove(&token).is_some() {
                    debug!("{} reset observation {}", from, token);
                }
            }
        }
    }

    fn on_event(&mut self, event: ServerEvent, ctx: &mut Context<'_, ServerEvent>) {
        match event {
            ServerEvent::LeaseCheck => self.check_leases(ctx),
        }
    }

    fn stop(&mut self) {
        self.lease_timer = None;
        self.pending.clear();
        self.observations.clear();
    }
}
