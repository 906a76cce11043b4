use clap::Parser;
use logstore_broker::broadband::UdpTransport;
use logstore_broker::config::NodeConfig;
use logstore_broker::node::Broker;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "logstore-broker", about = "Decentralized log-store broker")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "LOGSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP API address, overrides `node.http_bind`.
    #[arg(long)]
    http_bind: Option<String>,

    /// System stream address, overrides `node.udp_bind`.
    #[arg(long)]
    udp_bind: Option<String>,

    /// System stream peer, may be repeated. Replaces `node.peers`.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Skip cache recovery on startup.
    #[arg(long)]
    no_recovery: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(http_bind) = args.http_bind {
        config.node.http_bind = http_bind;
    }
    if let Some(udp_bind) = args.udp_bind {
        config.node.udp_bind = udp_bind;
    }
    if !args.peers.is_empty() {
        config.node.peers = args.peers;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let udp_bind: SocketAddr = config.node.udp_bind.parse()?;
    let http_bind: SocketAddr = config.node.http_bind.parse()?;
    let peers = config
        .node
        .peers
        .iter()
        .map(|peer| peer.parse::<SocketAddr>())
        .collect::<Result<Vec<_>, _>>()?;

    if peers.is_empty() {
        info!("No peers configured, running as a single broker");
    } else {
        info!("Peers: {:?}", peers);
    }

    // 1. System stream:
    let transport = UdpTransport::bind(udp_bind, peers, config.node.system_partitions).await?;
    transport.clone().start();

    // 2. Broker services:
    let identity = Broker::identity_from_config(&config)?;
    let broker = Broker::build(config, identity, transport);
    // Assignments arrive from an external registry; none is wired into the binary yet
    let (_assignment_tx, assignment_rx) = mpsc::channel(64);
    broker.start(assignment_rx).await;
    info!("Broker id: {}", broker.id());

    // 3. Cache recovery, once peers had a roll call round to answer:
    if !args.no_recovery {
        let recovering = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if let Err(e) = recovering.roll_call.call().await {
                warn!("Roll call before recovery failed: {}", e);
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            match recovering.recover_cache(0, u64::MAX).await {
                Ok(kept) => info!("Recovered {} cached message(s)", kept),
                Err(e) => warn!("Cache recovery failed: {}", e),
            }
        });
    }

    // 4. HTTP server:
    let app = broker.router();
    info!("HTTP server listening on {}", http_bind);
    let listener = tokio::net::TcpListener::bind(http_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
