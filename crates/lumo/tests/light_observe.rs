// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Light server and switch over UDP loopback.

use lumo::actuator::RecordingSink;
use lumo::codec::{text, Property};
use lumo::config::{LightServerConfig, SwitchConfig};
use lumo::light::{LightEvent, LightServer, LightSwitch, Phase, SwitchEvent};
use lumo::message::{ContentFormat, Observe, Response};
use lumo::{run, LoopHandle, Message, Node, NodeError, RunOptions, Status};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct Running<N: Node> {
    addr: SocketAddr,
    handle: LoopHandle<N::Event>,
    shutdown: Arc<Notify>,
    task: JoinHandle<Result<N, NodeError>>,
}

impl<N: Node> Running<N> {
    async fn stop(self) -> N {
        self.shutdown.notify_one();
        self.task.await.unwrap().unwrap()
    }
}

async fn loopback() -> Arc<UdpSocket> {
    Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
}

async fn spawn_on<N>(socket: Arc<UdpSocket>, node: N) -> Running<N>
where
    N: Node + Send + 'static,
{
    let addr = socket.local_addr().unwrap();
    let (handle, events) = LoopHandle::channel();
    let shutdown = Arc::new(Notify::new());
    let task = tokio::spawn(run(
        socket,
        node,
        handle.clone(),
        events,
        shutdown.clone(),
        RunOptions::default(),
    ));
    Running {
        addr,
        handle,
        shutdown,
        task,
    }
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let polled = timeout(Duration::from_secs(5), async {
        while !done() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}

async fn recv_message(socket: &UdpSocket, within: Duration) -> Option<(SocketAddr, Message)> {
    let mut buf = vec![0u8; 1152];
    let (len, from) = timeout(within, socket.recv_from(&mut buf)).await.ok()?.ok()?;
    Some((from, Message::decode(&buf[..len]).ok()?))
}

#[tokio::test]
async fn test_button_press_converges_both_sides() {
    let server_led = RecordingSink::new();
    let switch_led = RecordingSink::new();

    let server_config = LightServerConfig {
        join_group: false,
        ..Default::default()
    };
    let server = LightServer::new(&server_config, Box::new(server_led.clone())).unwrap();
    let server = spawn_on(loopback().await, server).await;

    let switch_config = SwitchConfig {
        discovery_address: server.addr,
        ..Default::default()
    };
    let switch = LightSwitch::new(&switch_config, Box::new(switch_led.clone()));
    let switch = spawn_on(loopback().await, switch).await;

    // server side press reaches the switch whatever the discovery timing
    server.handle.post(LightEvent::ButtonPressed);
    wait_for("switch LED on", || switch_led.last() == Some(true)).await;
    assert_eq!(server_led.last(), Some(true));

    // switch side press writes back to the server
    switch.handle.post(SwitchEvent::ButtonPressed);
    wait_for("server LED off", || server_led.last() == Some(false)).await;
    assert_eq!(switch_led.last(), Some(false));

    // let the write notification come back before stopping
    sleep(Duration::from_millis(200)).await;

    let server_addr = server.addr;
    let switch = switch.stop().await;
    let server = server.stop().await;
    assert!(!server.state());
    assert!(!switch.state());
    assert_eq!(switch.peer(), Some(server_addr));
    assert_eq!(switch.phase(), Phase::Observing);
}

#[tokio::test]
async fn test_first_discovery_reply_wins() {
    let rendezvous = loopback().await;
    let a = loopback().await;
    let b = loopback().await;

    let switch_led = RecordingSink::new();
    let switch_config = SwitchConfig {
        discovery_address: rendezvous.local_addr().unwrap(),
        ..Default::default()
    };
    let switch = spawn_on(
        loopback().await,
        LightSwitch::new(&switch_config, Box::new(switch_led.clone())),
    )
    .await;

    let (client, Message::Request(discovery)) =
        recv_message(&rendezvous, Duration::from_secs(5)).await.unwrap()
    else {
        panic!("expected discovery request");
    };
    assert_eq!(client, switch.addr);

    let reply = |state: bool| -> Vec<u8> {
        let payload = text::encode(
            Some(&discovery.path),
            &[Property::boolean("state", state)],
        )
        .unwrap();
        Message::Response(
            Response::new(discovery.token, Status::Content).with_payload(ContentFormat::Text, payload),
        )
        .encode()
        .unwrap()
    };

    a.send_to(&reply(true), client).await.unwrap();
    wait_for("A bound", || switch_led.last() == Some(true)).await;
    b.send_to(&reply(false), client).await.unwrap();

    let (_, Message::Request(observe)) = recv_message(&a, Duration::from_secs(5)).await.unwrap() else {
        panic!("expected observe request at A");
    };
    assert_eq!(observe.observe, Some(Observe::Register));
    assert!(recv_message(&b, Duration::from_millis(200)).await.is_none());

    let switch = switch.stop().await;
    assert_eq!(switch.peer(), Some(a.local_addr().unwrap()));
    assert!(switch.state());
}
