// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lumo node runner
//!
//! Runs one role on a single-threaded runtime over UDP. Physical I/O is
//! simulated: every line read from stdin is a button press, and the LED is a
//! log line.
//!
//! # Usage
//!
//! ```bash
//! # Lamp on [::]:5683, joined to the discovery group
//! lumo-node light-server
//!
//! # Switch discovering the lamp through a unicast address
//! lumo-node light-switch --discovery '[::1]:5683'
//!
//! # Management server and a device registering with it
//! lumo-node dm-server --bind '[::1]:5683'
//! lumo-node dm-device --server '[::1]:5683' --endpoint kitchen
//! ```

use clap::{Parser, Subcommand};
use lumo::actuator::LogSink;
use lumo::light::{LightEvent, LightServer, LightSwitch, SwitchEvent};
use lumo::lwm2m::{Device, LocationMonitor, ManagementServer};
use lumo::runtime::{bind, join_multicast};
use lumo::{run, LoopHandle, Node, RunOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

pub use config::NodeConfig;

/// lumo node - observable resources over UDP
#[derive(Parser, Debug)]
#[command(name = "lumo-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    role: Role,

    /// Configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local address, overrides the role's configured bind address
    #[arg(short, long, global = true)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Serve the lamp resource
    LightServer {
        /// Do not join the discovery multicast group
        #[arg(long)]
        no_group: bool,
    },

    /// Discover and drive a lamp
    LightSwitch {
        /// Rendezvous address for discovery
        #[arg(long)]
        discovery: Option<SocketAddr>,

        /// Repeat discovery at this interval until a lamp answers
        #[arg(long)]
        retry_ms: Option<u64>,
    },

    /// Accept device registrations and manage their location object
    DmServer,

    /// Register with a management server and serve objects
    DmDevice {
        /// Management server address
        #[arg(long)]
        server: Option<SocketAddr>,

        /// Endpoint name
        #[arg(long)]
        endpoint: Option<String>,
    },
}

fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Post `event` for every line on stdin.
fn spawn_button<E>(handle: LoopHandle<E>, event: E)
where
    E: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            debug!("Button pressed (stdin)");
            if !handle.post(event.clone()) {
                break;
            }
        }
    });
}

/// Run `node` on `socket` until Ctrl-C.
async fn serve<N>(
    socket: tokio::net::UdpSocket,
    node: N,
    button: Option<N::Event>,
    options: RunOptions,
) -> Result<N, Box<dyn std::error::Error>>
where
    N: Node,
    N::Event: Clone,
{
    let (handle, events) = LoopHandle::channel();
    let shutdown = Arc::new(Notify::new());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping node...");
        signal.notify_one();
    });

    if let Some(event) = button {
        spawn_button(handle.clone(), event);
    }

    Ok(run(Arc::new(socket), node, handle, events, shutdown, options).await?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        NodeConfig::from_file(config_path)?
    } else {
        NodeConfig::default()
    };
    config.validate()?;
    let options = RunOptions {
        max_datagram_size: config.max_datagram_size,
    };

    info!("lumo-node v{}", env!("CARGO_PKG_VERSION"));

    match args.role {
        Role::LightServer { no_group } => {
            let mut role = config.light_server;
            if let Some(addr) = args.bind {
                role.bind = addr;
            }
            if no_group {
                role.join_group = false;
            }
            role.validate()?;

            let socket = bind(role.bind).await?;
            if role.join_group {
                join_multicast(&socket, role.group)?;
                info!("Joined discovery group {}", role.group);
            }
            let node = LightServer::new(&role, Box::new(LogSink::new("server")))?;
            info!("Light server on {} serving {}", role.bind, node.path());
            serve(socket, node, Some(LightEvent::ButtonPressed), options).await?;
        }
        Role::LightSwitch {
            discovery,
            retry_ms,
        } => {
            let mut role = config.light_switch;
            if let Some(addr) = args.bind {
                role.bind = addr;
            }
            if let Some(addr) = discovery {
                role.discovery_address = addr;
            }
            if retry_ms.is_some() {
                role.discovery_retry_ms = retry_ms;
            }
            role.validate()?;

            let socket = bind(role.bind).await?;
            let node = LightSwitch::new(&role, Box::new(LogSink::new("client")));
            serve(socket, node, Some(SwitchEvent::ButtonPressed), options).await?;
        }
        Role::DmServer => {
            let mut role = config.management_server;
            if let Some(addr) = args.bind {
                role.bind = addr;
            }
            role.validate()?;

            let socket = bind(role.bind).await?;
            let mut node = ManagementServer::new(&role);
            node.add_monitor(Box::new(LocationMonitor::new(
                role.default_latitude.clone(),
                role.default_longitude.clone(),
            )));
            info!("Management server on {}", role.bind);
            let node = serve(socket, node, None, options).await?;
            info!("{} client(s) registered at shutdown", node.clients().len());
        }
        Role::DmDevice { server, endpoint } => {
            let mut role = config.device;
            if let Some(addr) = args.bind {
                role.bind = addr;
            }
            if let Some(addr) = server {
                role.server = addr;
            }
            if let Some(name) = endpoint {
                role.endpoint_name = name;
            }
            role.validate()?;

            let socket = bind(role.bind).await?;
            let node = Device::new(&role)?;
            info!("Device {} managed by {}", role.endpoint_name, role.server);
            serve(socket, node, None, options).await?;
        }
    }

    info!("Node stopped");
    Ok(())
}
