// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery/observe client (the light switch).
//!
//! ```text
//!  Init --discover--> Discovering --first reply--> Found --observe ack--> Observing
//! ```
//!
//! Only the first discovery reply binds a peer; the `found` flag is never
//! reset, so later replies (from any endpoint) are ignored. There is no
//! keep-alive: a peer that silently dies leaves the switch observing forever.

use super::STATE;
use crate::actuator::{DebouncedActuator, OutputSink, Trigger};
use crate::codec::{self, text, Property};
use crate::config::SwitchConfig;
use crate::event_loop::TimerGuard;
use crate::message::{
    sequence_is_newer, ContentFormat, Message, Method, Notification, Observe, Request, ResourcePath, Response,
    Status, Token, TokenSource,
};
use crate::runtime::{Context, Node};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Switch loop events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    ButtonPressed,
    DebounceExpired(u64),
    RetryDiscovery,
}

/// Client progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Discovering,
    Found,
    Observing,
}

/// The light switch node.
pub struct LightSwitch {
    path: ResourcePath,
    discovery_address: SocketAddr,
    discovery_retry: Option<Duration>,
    phase: Phase,
    found: bool,
    peer: Option<SocketAddr>,
    tokens: TokenSource,
    discovery_token: Option<Token>,
    observe_token: Option<Token>,
    last_sequence: Option<u32>,
    button: DebouncedActuator,
    led: Box<dyn OutputSink>,
    retry_timer: Option<TimerGuard>,
}

impl LightSwitch {
    pub fn new(config: &SwitchConfig, led: Box<dyn OutputSink>) -> Self {
        Self {
            path: ResourcePath::parse(&config.path),
            discovery_address: config.discovery_address,
            discovery_retry: config.discovery_retry(),
            phase: Phase::Init,
            found: false,
            peer: None,
            tokens: TokenSource::new(),
            discovery_token: None,
            observe_token: None,
            last_sequence: None,
            button: DebouncedActuator::new(false, config.debounce()),
            led,
            retry_timer: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bound peer, once discovery succeeded.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Mirrored lamp state.
    pub fn state(&self) -> bool {
        self.button.value()
    }

    /// Send one discovery request to the rendezvous address.
    pub fn discover(&mut self, ctx: &mut Context<'_, SwitchEvent>) {
        let token = self.tokens.next_token();
        self.discovery_token = Some(token);
        self.phase = Phase::Discovering;

        info!("Discovering {} at {}", self.path, self.discovery_address);
        ctx.send(
            self.discovery_address,
            Request::new(Method::Get, self.path.clone(), token),
        );

        if let (Some(period), None) = (self.discovery_retry, &self.retry_timer) {
            self.retry_timer = Some(ctx.handle.arm_periodic(period, SwitchEvent::RetryDiscovery));
        }
    }

    fn observe(&mut self, peer: SocketAddr, ctx: &mut Context<'_, SwitchEvent>) {
        let token = self.tokens.next_token();
        self.observe_token = Some(token);
        self.last_sequence = None;
        debug!("Observing {} on {} (token {})", self.path, peer, token);
        ctx.send(
            peer,
            Request::new(Method::Get, self.path.clone(), token).with_observe(Observe::Register),
        );
    }

    /// Local button edge: flip, drive the LED, write the new state to the peer.
    pub fn press_button(&mut self, ctx: &mut Context<'_, SwitchEvent>) {
        let Some(peer) = self.peer.filter(|_| self.found) else {
            info!("Button ignored: no light found yet");
            return;
        };

        match self.button.trigger(ctx.handle, SwitchEvent::DebounceExpired) {
            Trigger::Flipped(state) => {
                self.led.write(state);
                let payload = match text::encode(None, &[Property::boolean(STATE, state)]) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Cannot encode write: {}", e);
                        return;
                    }
                };
                let token = self.tokens.next_token();
                info!("Setting light at {} {}", peer, if state { "on" } else { "off" });
                ctx.send(
                    peer,
                    Request::new(Method::Put, self.path.clone(), token).with_payload(ContentFormat::Text, payload),
                );
            }
            Trigger::Dropped => debug!("Button press ignored (debounce)"),
        }
    }

    /// Extract the lamp state from a text payload and mirror it.
    fn apply_representation(&mut self, payload: &[u8]) -> bool {
        let state = text::decode(payload)
            .map_err(|e| e.to_string())
            .and_then(|rep| {
                codec::find(&rep.properties, &STATE.into())
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| "no boolean state".to_string())
            });

        match state {
            Ok(state) => {
                self.button.set(state);
                self.led.write(state);
                true
            }
            Err(e) => {
                warn!("Dropping undecodable representation: {}", e);
                false
            }
        }
    }

    fn on_response(&mut self, from: SocketAddr, response: Response, ctx: &mut Context<'_, SwitchEvent>) {
        let token = Some(response.token);

        if token == self.discovery_token {
            if self.found {
                debug!(
                    "Ignoring discovery reply from {}: bound to {:?}",
                    from, self.peer
                );
                return;
            }
            if response.status != Status::Content {
                warn!("Discovery reply from {}: {}", from, response.status);
                return;
            }

            self.found = true;
            self.peer = Some(from);
            self.phase = Phase::Found;
            self.retry_timer = None;
            info!("Found {} at {}", self.path, from);

            self.apply_representation(&response.payload);
            self.observe(from, ctx);
        } else if token == self.observe_token && Some(from) == self.peer {
            if !response.status.is_success() {
                warn!("Observe refused by {}: {}", from, response.status);
                return;
            }
            // Only the first ack, or one newer than what notifications brought.
            let fresh = self.phase == Phase::Found
                || matches!(
                    (self.last_sequence, response.sequence),
                    (Some(last), Some(sequence)) if sequence_is_newer(last, sequence)
                );
            if !fresh {
                debug!("Dropping duplicate observe ack from {}", from);
                return;
            }
            self.phase = Phase::Observing;
            if response.sequence.is_some() {
                self.last_sequence = response.sequence;
            }
            if !response.payload.is_empty() {
                self.apply_representation(&response.payload);
            }
        } else if Some(from) == self.peer && !response.status.is_success() {
            warn!("Request {} refused by {}: {}", response.token, from, response.status);
        } else {
            debug!("Response {} from {}: {}", response.token, from, response.status);
        }
    }

    fn on_notification(&mut self, from: SocketAddr, notification: Notification, ctx: &mut Context<'_, SwitchEvent>) {
        if Some(notification.token) != self.observe_token || Some(from) != self.peer {
            debug!("Unknown observation {} from {}, resetting", notification.token, from);
            ctx.send(from, Message::Reset { token: notification.token });
            return;
        }

        if let Some(last) = self.last_sequence {
            if !sequence_is_newer(last, notification.sequence) {
                debug!(
                    "Dropping stale notification {} (last {})",
                    notification.sequence, last
                );
                return;
            }
        }

        self.phase = Phase::Observing;
        if self.apply_representation(&notification.payload) {
            self.last_sequence = Some(notification.sequence);
        }
    }
}

impl Node for LightSwitch {
    type Event = SwitchEvent;

    fn start(&mut self, ctx: &mut Context<'_, SwitchEvent>) {
        self.led.write(self.button.value());
        self.discover(ctx);
    }

    fn on_message(&mut self, from: SocketAddr, message: Message, ctx: &mut Context<'_, SwitchEvent>) {
        match message {
            Message::Response(response) => self.on_response(from, response, ctx),
            Message::Notification(notification) => self.on_notification(from, notification, ctx),
            Message::Request(request) => {
                ctx.send(from, request.reply(Status::NotFound));
            }
            Message::Reset { token } => debug!("Reset {} from {}", token, from),
        }
    }

    fn on_event(&mut self, event: SwitchEvent, ctx: &mut Context<'_, SwitchEvent>) {
        match event {
            SwitchEvent::ButtonPressed => self.press_button(ctx),
            SwitchEvent::DebounceExpired(generation) => {
                if !self.button.expire(generation) {
                    debug!("Stale debounce expiry {}", generation);
                }
            }
            SwitchEvent::RetryDiscovery => {
                if !self.found {
                    self.discover(ctx);
                }
            }
        }
    }

    fn stop(&mut self) {
        self.retry_timer = None;
        self.button.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RecordingSink;
    use crate::event_loop::LoopHandle;
    use crate::transport::RecordingOutbox;
    use tokio::sync::mpsc;

    struct Harness {
        switch: LightSwitch,
        led: RecordingSink,
        outbox: RecordingOutbox,
        handle: LoopHandle<SwitchEvent>,
        rx: mpsc::UnboundedReceiver<SwitchEvent>,
    }

    impl Harness {
        fn new(config: SwitchConfig) -> Self {
            let led = RecordingSink::new();
            let (handle, rx) = LoopHandle::channel();
            Self {
                switch: LightSwitch::new(&config, Box::new(led.clone())),
                led,
                outbox: RecordingOutbox::new(),
                handle,
                rx,
            }
        }

        fn start(&mut self) {
            self.switch.start(&mut Context::new(&mut self.outbox, &self.handle));
        }

        fn deliver(&mut self, from: SocketAddr, message: impl Into<Message>) {
            self.switch
                .on_message(from, message.into(), &mut Context::new(&mut self.outbox, &self.handle));
        }

        fn event(&mut self, event: SwitchEvent) {
            self.switch.on_event(event, &mut Context::new(&mut self.outbox, &self.handle));
        }

        /// Last request sent.
        fn last_request(&self) -> Request {
            self.outbox
                .sent
                .iter()
                .rev()
                .find_map(|(_, m)| match m {
                    Message::Request(r) => Some(r.clone()),
                    _ => None,
                })
                .expect("no request sent")
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn lamp(state: bool) -> Vec<u8> {
        text::encode(
            Some(&ResourcePath::parse("/a/light")),
            &[
                Property::integer("power", 100),
                Property::string("name", "Soletta LAMP!"),
                Property::boolean(STATE, state),
            ],
        )
        .unwrap()
    }

    fn content(token: Token, state: bool) -> Response {
        Response::new(token, Status::Content).with_payload(ContentFormat::Text, lamp(state))
    }

    fn notification(token: Token, sequence: u32, state: bool) -> Notification {
        Notification {
            token,
            sequence,
            status: Status::Content,
            format: Some(ContentFormat::Text),
            payload: lamp(state),
        }
    }

    /// Discover, bind to `peer` and acknowledge the observation.
    fn bound(peer: SocketAddr, state: bool) -> (Harness, Token) {
        let mut h = Harness::new(SwitchConfig::default());
        h.start();
        let discovery = h.last_request();
        h.deliver(peer, content(discovery.token, state));
        let observe = h.last_request();
        h.deliver(peer, content(observe.token, state).with_sequence(0));
        (h, observe.token)
    }

    #[tokio::test]
    async fn test_discovery_request_goes_to_rendezvous() {
        let mut h = Harness::new(SwitchConfig::default());
        h.start();
        assert_eq!(h.switch.phase(), Phase::Discovering);

        let (to, _) = &h.outbox.sent[0];
        assert_eq!(to.to_string(), "[ff02::fd]:5683");
        let req = h.last_request();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, ResourcePath::parse("/a/light"));
        assert_eq!(req.observe, None);
    }

    #[tokio::test]
    async fn test_first_responder_wins() {
        let mut h = Harness::new(SwitchConfig::default());
        h.start();
        let discovery = h.last_request();

        h.deliver(addr(1), content(discovery.token, true));
        h.deliver(addr(2), content(discovery.token, false));

        assert_eq!(h.switch.peer(), Some(addr(1)));
        assert_eq!(h.switch.phase(), Phase::Found);
        assert!(h.switch.state());

        let requests: Vec<_> = h
            .outbox
            .sent
            .iter()
            .filter(|(_, m)| matches!(m, Message::Request(_)))
            .collect();
        // discovery + one observe, both replies considered once
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].0, addr(1));
        assert_eq!(h.last_request().observe, Some(Observe::Register));
    }

    #[tokio::test]
    async fn test_notification_updates_mirror_and_led() {
        let (mut h, token) = bound(addr(1), false);
        assert_eq!(h.switch.phase(), Phase::Observing);

        h.deliver(addr(1), notification(token, 1, true));
        assert!(h.switch.state());
        assert_eq!(h.led.last(), Some(true));
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_notifications_dropped() {
        let (mut h, token) = bound(addr(1), false);

        h.deliver(addr(1), notification(token, 5, true));
        h.deliver(addr(1), notification(token, 4, false));
        h.deliver(addr(1), notification(token, 5, false));
        assert!(h.switch.state());

        h.deliver(addr(1), notification(token, 6, false));
        assert!(!h.switch.state());
    }

    #[tokio::test]
    async fn test_duplicate_observe_ack_does_not_roll_back() {
        let (mut h, token) = bound(addr(1), false);

        h.deliver(addr(1), notification(token, 5, true));
        assert!(h.switch.state());

        // the ack comes around again after a newer notification
        h.deliver(addr(1), content(token, false).with_sequence(0));
        assert!(h.switch.state());
        assert_eq!(h.led.last(), Some(true));

        // window still at 5: a replayed older notification is stale
        h.deliver(addr(1), notification(token, 3, false));
        assert!(h.switch.state());

        h.deliver(addr(1), notification(token, 6, false));
        assert!(!h.switch.state());
    }

    #[tokio::test]
    async fn test_late_ack_after_first_notification_dropped() {
        let mut h = Harness::new(SwitchConfig::default());
        h.start();
        let discovery = h.last_request();
        h.deliver(addr(1), content(discovery.token, false));
        let observe = h.last_request();

        h.deliver(addr(1), notification(observe.token, 2, true));
        assert_eq!(h.switch.phase(), Phase::Observing);

        h.deliver(addr(1), content(observe.token, false).with_sequence(1));
        assert!(h.switch.state());
    }

    #[tokio::test]
    async fn test_undecodable_notification_keeps_observing() {
        let (mut h, token) = bound(addr(1), true);
        let mut bad = notification(token, 1, false);
        bad.payload = b"{broken".to_vec();

        h.deliver(addr(1), bad);
        assert!(h.switch.state());
        assert_eq!(h.switch.phase(), Phase::Observing);

        h.deliver(addr(1), notification(token, 2, false));
        assert!(!h.switch.state());
    }

    #[tokio::test]
    async fn test_unknown_token_is_reset() {
        let (mut h, _) = bound(addr(1), false);
        h.outbox.drain();

        h.deliver(addr(9), notification(Token(0xdead), 1, true));
        assert_eq!(h.outbox.sent, vec![(addr(9), Message::Reset { token: Token(0xdead) })]);
        assert!(!h.switch.state());
    }

    #[tokio::test]
    async fn test_button_ignored_before_found() {
        let mut h = Harness::new(SwitchConfig::default());
        h.start();
        h.outbox.drain();

        h.event(SwitchEvent::ButtonPressed);
        assert!(h.outbox.sent.is_empty());
        assert!(!h.switch.state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_writes_to_bound_peer_once_per_window() {
        let (mut h, _) = bound(addr(1), false);
        h.outbox.drain();

        h.event(SwitchEvent::ButtonPressed);
        h.event(SwitchEvent::ButtonPressed);

        let sent = h.outbox.drain();
        assert_eq!(sent.len(), 1);
        let (to, Message::Request(put)) = &sent[0] else {
            panic!("expected request");
        };
        assert_eq!(*to, addr(1));
        assert_eq!(put.method, Method::Put);
        assert_eq!(
            String::from_utf8(put.payload.clone()).unwrap(),
            r#"{"oc":[{"rep":{"state":true}}]}"#
        );
        assert_eq!(h.led.last(), Some(true));

        let expiry = h.rx.recv().await.unwrap();
        h.event(expiry);
        h.event(SwitchEvent::ButtonPressed);
        assert_eq!(h.outbox.drain().len(), 1);
        assert!(!h.switch.state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_retry_until_found() {
        let mut h = Harness::new(SwitchConfig {
            discovery_retry_ms: Some(1000),
            ..Default::default()
        });
        h.start();

        let tick = h.rx.recv().await.unwrap();
        assert_eq!(tick, SwitchEvent::RetryDiscovery);
        h.event(tick);
        assert_eq!(h.outbox.sent.len(), 2);

        let discovery = h.last_request();
        h.deliver(addr(1), content(discovery.token, false));
        assert_eq!(h.switch.phase(), Phase::Found);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.rx.try_recv().is_err());
    }
}
