// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Light-switch roles.
//!
//! The server exposes one observable lamp resource (`/a/light` by default)
//! whose `state` follows a local debounced button and remote writes. The
//! switch ([`client::LightSwitch`]) discovers the lamp, observes it and
//! mirrors its state onto a local LED.
//!
//! ```text
//!  button ──► DebouncedActuator ─┐
//!                                ├─► registry.write ─► publish ─► LED + notify all
//!  PUT /a/light ─► dispatch ─────┘
//! ```

pub mod client;

pub use client::{LightSwitch, Phase, SwitchEvent};

use crate::actuator::{DebouncedActuator, OutputSink, Trigger};
use crate::codec::{text, Property, PropertyKind, Schema};
use crate::config::LightServerConfig;
use crate::error::RequestError;
use crate::message::{ContentFormat, Message, Request, ResourcePath, Status};
use crate::registry::{required_bool, Capabilities, Effect, ResourceBehavior, ResourceRegistry};
use crate::runtime::{Context, Node};
use crate::subscription::SubscriptionManager;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Name of the boolean lamp property.
pub const STATE: &str = "state";

/// The lamp resource: fixed `power` and `name`, writable `state`.
#[derive(Debug)]
pub struct LightResource {
    power: i64,
    name: String,
    state: bool,
    schema: Schema,
}

impl LightResource {
    pub fn new(name: impl Into<String>, power: i64, state: bool) -> Self {
        Self {
            power,
            name: name.into(),
            state,
            schema: Schema::new()
                .field("power", PropertyKind::Integer)
                .field("name", PropertyKind::String)
                .mandatory(STATE, PropertyKind::Boolean),
        }
    }
}

impl ResourceBehavior for LightResource {
    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::WRITE
    }

    fn schema(&self) -> Option<&Schema> {
        Some(&self.schema)
    }

    fn read(&self) -> Vec<Property> {
        vec![
            Property::integer("power", self.power),
            Property::string("name", self.name.clone()),
            Property::boolean(STATE, self.state),
        ]
    }

    fn write(&mut self, properties: &[Property]) -> Result<(), RequestError> {
        self.state = required_bool(properties, STATE)?;
        Ok(())
    }
}

/// Light server loop events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightEvent {
    ButtonPressed,
    DebounceExpired(u64),
}

/// The lamp server node.
pub struct LightServer {
    path: ResourcePath,
    registry: ResourceRegistry,
    subscriptions: SubscriptionManager,
    button: DebouncedActuator,
    led: Box<dyn OutputSink>,
}

impl LightServer {
    pub fn new(config: &LightServerConfig, led: Box<dyn OutputSink>) -> Result<Self, RequestError> {
        let path = ResourcePath::parse(&config.path);
        let mut registry = ResourceRegistry::new(ContentFormat::Text);
        registry.register(
            path.clone(),
            Box::new(LightResource::new(config.name.clone(), config.power, false)),
        )?;

        Ok(Self {
            path,
            registry,
            subscriptions: SubscriptionManager::new(config.retry_budget),
            button: DebouncedActuator::new(false, config.debounce()),
            led,
        })
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Current lamp state.
    pub fn state(&self) -> bool {
        self.button.value()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Local button edge.
    pub fn press_button(&mut self, ctx: &mut Context<'_, LightEvent>) {
        match self.button.trigger(ctx.handle, LightEvent::DebounceExpired) {
            Trigger::Flipped(state) => {
                info!("Button pressed, light {}", if state { "on" } else { "off" });
                let path = self.path.clone();
                match self.registry.write(&path, &[Property::boolean(STATE, state)]) {
                    Ok(()) => self.publish(&path, ctx),
                    Err(e) => warn!("Local write to {} failed: {}", path, e),
                }
            }
            Trigger::Dropped => debug!("Button press ignored (debounce)"),
        }
    }

    /// Answer a request and apply its effect.
    pub fn handle_request(&mut self, from: SocketAddr, request: Request, ctx: &mut Context<'_, LightEvent>) {
        let dispatch = self.registry.dispatch(&request);
        let mut response = dispatch.response;

        match &dispatch.effect {
            Effect::Subscribe(path) => {
                self.subscriptions.subscribe(path, from, request.token);
                response = response.with_sequence(self.subscriptions.sequence(path));
            }
            Effect::Unsubscribe(path) => {
                self.subscriptions.unsubscribe(path, from);
            }
            Effect::Removed(path) => {
                self.subscriptions.remove_resource(path);
            }
            Effect::Changed(_) | Effect::None => {}
        }

        debug!("{:?} {} from {} -> {}", request.method, request.path, from, response.status);
        ctx.send(from, response);

        if let Effect::Changed(path) = dispatch.effect {
            self.publish(&path, ctx);
        }
    }

    /// Single outlet for state changes: LED first, then every observer.
    fn publish(&mut self, path: &ResourcePath, ctx: &mut Context<'_, LightEvent>) {
        let properties = match self.registry.read(path) {
            Ok(properties) => properties,
            Err(e) => {
                warn!("Cannot publish {}: {}", path, e);
                return;
            }
        };

        if let Some(state) = crate::codec::find(&properties, &STATE.into()).and_then(|v| v.as_bool()) {
            self.button.set(state);
            self.led.write(state);
        }

        let payload = match text::encode(Some(path), &properties) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot encode {}: {}", path, e);
                return;
            }
        };

        let report = self.subscriptions.notify_all(
            path,
            Status::Content,
            ContentFormat::Text,
            &payload,
            ctx.outbox,
        );
        debug!(
            "Notified {} observers of {} ({} failed)",
            report.delivered, path, report.failed
        );
    }
}

impl Node for LightServer {
    type Event = LightEvent;

    fn start(&mut self, _ctx: &mut Context<'_, LightEvent>) {
        info!("Serving {}", self.path);
        self.led.write(self.button.value());
    }

    fn on_message(&mut self, from: SocketAddr, message: Message, ctx: &mut Context<'_, LightEvent>) {
        match message {
            Message::Request(request) => self.handle_request(from, request, ctx),
            Message::Reset { token } => {
                self.subscriptions.reset(from, token);
            }
            other => debug!("Ignoring unexpected {:?} from {}", other.token(), from),
        }
    }

    fn on_event(&mut self, event: LightEvent, ctx: &mut Context<'_, LightEvent>) {
        match event {
            LightEvent::ButtonPressed => self.press_button(ctx),
            LightEvent::DebounceExpired(generation) => {
                if !self.button.expire(generation) {
                    debug!("Stale debounce expiry {}", generation);
                }
            }
        }
    }

    fn stop(&mut self) {
        self.button.cancel();
        self.subscriptions.clear();
    }
}
