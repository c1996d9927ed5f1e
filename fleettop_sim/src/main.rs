//! Entry point for the sim backend. Seeds the fleet, starts the drift task,
//! and binds the HTTP surface.

use fleettop_sim::cli::parse_port;
use fleettop_sim::fleet::SimFleet;
use fleettop_sim::routes::router;
use fleettop_sim::sampler::spawn_drift;
use fleettop_sim::state::{feed_period, local_host_enabled, seeded_hosts, SimState};
use std::net::SocketAddr;
use tracing::info;

const DEFAULT_PORT: u16 = 50051;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let port = parse_port(std::env::args(), DEFAULT_PORT);
    let fleet = SimFleet::seed(seeded_hosts(), local_host_enabled());
    let state = SimState::with_period(fleet, feed_period());
    let _drift = spawn_drift(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, hosts = seeded_hosts(), "sim backend listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
