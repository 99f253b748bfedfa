use anyhow::Context;
use clap::Parser;
use memberwatch::cli::{Cli, Command, InitArgs, JoinArgs, NodeArgs};
use memberwatch::lifecycle::{termination_signal, Lifecycle};
use mw_cluster::MembershipEngine;
use mw_core::config::{parse_seed, DEFAULT_LEAVE_TIMEOUT};
use mw_core::{ClusterSecret, TransportConfig};
use mw_health::{HealthAggregator, ReportServer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    memberwatch::init_logging(&cli.log_level);

    match cli.command {
        Command::Init(args) => run_init(args).await,
        Command::Join(args) => run_join(args).await,
    }
}

async fn run_init(args: InitArgs) -> anyhow::Result<()> {
    let secret = ClusterSecret::generate().context("generating cluster key")?;
    let config = TransportConfig::resolve(args.node.bind_ip, args.node.gossip_port, secret.clone())?;
    let engine = MembershipEngine::create_cluster(config).await?;
    tracing::info!(key = %secret.encode(), "cluster key, pass it to joining nodes with --cluster-key");
    run_node(engine, &args.node).await
}

async fn run_join(args: JoinArgs) -> anyhow::Result<()> {
    let secret = ClusterSecret::decode(&args.cluster_key).context("invalid --cluster-key")?;
    let seed = parse_seed(&args.known_ip, args.node.gossip_port)?;
    let config = TransportConfig::resolve(args.node.bind_ip, args.node.gossip_port, secret)?;
    let engine = MembershipEngine::join_cluster(config, seed).await?;
    run_node(engine, &args.node).await
}

async fn run_node(engine: MembershipEngine, node: &NodeArgs) -> anyhow::Result<()> {
    let engine = Arc::new(engine);
    let mut lifecycle = Lifecycle::new(engine.clone(), DEFAULT_LEAVE_TIMEOUT);

    let http_addr = node.http_addr();
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding report server on {}", http_addr))?;
    tracing::info!(
        url = %format!("http://{}:{}/", node.bind_ip, node.http_port),
        "webserver is up"
    );

    let server = ReportServer::new(engine.clone(), HealthAggregator::new(node.health_config()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let http = tokio::spawn(server.serve_on(listener, async move {
        let _ = stop_rx.await;
    }));

    lifecycle.supervise(http, stop_tx, termination_signal()).await?;
    Ok(())
}
