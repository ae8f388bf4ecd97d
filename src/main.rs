//! CLI & bootstrap (C7)
//!
//! Parses `relay-server <trusted_host> <trusted_port>`, brings up logging,
//! binds the relay listening socket, dials the trusted upstream and local
//! nodes, and wires everything into one [`RelayHub`]. See spec.md §6 and
//! SPEC_FULL.md §4.7.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tracing::{info, warn};

use relay_hub::config::Config;
use relay_hub::dns;
use relay_hub::hub::RelayHub;
use relay_hub::p2p;
use relay_hub::peer::{self, PeerEvent, PeerRole};
use relay_hub::utils;

/// Compact-relay fan-out hub between a trusted node, a local node, and
/// untrusted relay clients.
#[derive(Debug, Parser)]
#[command(name = "relay-server", version, about)]
struct Args {
    /// Hostname or address of the trusted upstream Bitcoin node.
    trusted_host: String,

    /// Port of the trusted upstream Bitcoin node.
    trusted_port: u16,

    /// Path to an optional TOML config file overriding relay/network/logging defaults.
    #[arg(long)]
    config: Option<String>,

    /// Emit structured JSON log lines instead of human-readable text.
    #[arg(long)]
    json_logging: bool,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config from {path}: {err}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if args.json_logging {
        config.logging.json_format = true;
    }
    utils::init_logging_from_config(Some(&config.logging));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    runtime.block_on(run(args, config));
}

async fn run(args: Args, config: Config) {
    let hub = RelayHub::new(config.relay.clone());
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

    let listener = match bind_listener(config.network.listen_addr, config.network.listen_backlog) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!(
                "failed to bind relay listener on {}: {err}",
                config.network.listen_addr
            );
            std::process::exit(1);
        }
    };
    info!(
        addr = %config.network.listen_addr,
        backlog = config.network.listen_backlog,
        "relay listener bound"
    );

    tokio::spawn(accept_loop(
        listener,
        hub.clone(),
        config.clone(),
        events_tx.clone(),
    ));

    tokio::spawn(connect_trusted_with_retry(
        args.trusted_host.clone(),
        args.trusted_port,
        hub.clone(),
        config.relay.clone(),
        events_tx.clone(),
    ));

    tokio::spawn(connect_local_with_retry(
        config.network.local_p2p_addr,
        hub.clone(),
        config.relay.clone(),
        events_tx.clone(),
    ));

    let hub_driver = tokio::spawn(hub.clone().run(events_rx));

    utils::wait_for_shutdown_signal().await;
    info!("shutting down relay hub");
    drop(events_tx);
    let _ = hub_driver.await;
}

/// Build and bind the relay listening socket with an explicit accept
/// backlog (spec.md §6: "TCP port 8336, backlog 3") — `tokio::net::TcpListener::bind`
/// has no backlog parameter of its own, so the socket is built and bound at
/// the `socket2` level, set non-blocking, then handed to tokio.
fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// Accept untrusted relay-client connections forever, rejecting
/// monitoring-bot probes by reverse-DNS hostname before the handshake
/// (spec.md §6) and handing everything else to the hub's roster.
async fn accept_loop(
    listener: TcpListener,
    hub: Arc<RelayHub>,
    config: Config,
    events: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };

        let ip = addr.ip();
        let suffixes = config.network.blocked_hostname_suffixes.clone();
        let blocked = tokio::task::spawn_blocking(move || dns::is_blocked(ip, &suffixes))
            .await
            .unwrap_or(false);
        if blocked {
            info!(%addr, "rejecting blocked hostname, closing connection");
            continue;
        }

        let hub = hub.clone();
        let relay_config = config.relay.clone();
        let events = events.clone();
        tokio::spawn(async move {
            match peer::spawn(stream, addr, PeerRole::Relay, relay_config, events).await {
                Ok(handle) => hub.add_peer(handle).await,
                Err(err) => warn!(%addr, error = %err, "relay peer handshake failed"),
            }
        });
    }
}

/// Dial the trusted upstream node, retrying with backoff if it is
/// unreachable or drops — the hub has nothing to relay without it, so this
/// loop never gives up (unlike a relay client's connection, which is simply
/// dropped on failure).
async fn connect_trusted_with_retry(
    host: String,
    port: u16,
    hub: Arc<RelayHub>,
    relay_config: relay_hub::config::RelayConfig,
    events: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
) {
    let retry = utils::RetryConfig::network();
    loop {
        let result = utils::retry_async_with_backoff(&retry, || {
            p2p::connect_trusted(&host, port, relay_config.clone(), events.clone())
        })
        .await;

        match result {
            Ok(handle) => {
                hub.add_peer(handle).await;
                return;
            }
            Err(err) => {
                warn!(%host, port, error = %err, "could not reach trusted upstream node, giving up for now");
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
        }
    }
}

/// Dial the local full node, retrying with backoff — the local node is
/// expected to come and go across the hub's lifetime (e.g. during its own
/// restarts), so connection failure here is logged, not fatal.
async fn connect_local_with_retry(
    addr: SocketAddr,
    hub: Arc<RelayHub>,
    relay_config: relay_hub::config::RelayConfig,
    events: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
) {
    let retry = utils::RetryConfig::network();
    loop {
        let result =
            utils::retry_async_with_backoff(&retry, || p2p::connect_local(addr, relay_config.clone(), events.clone()))
                .await;

        match result {
            Ok(handle) => {
                hub.add_peer(handle).await;
                return;
            }
            Err(err) => {
                warn!(%addr, error = %err, "could not reach local node, giving up for now");
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
        }
    }
}
