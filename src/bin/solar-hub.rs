// Hub entry point - dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use solar_sim::application::coordinator::HubCoordinator;
use solar_sim::domain::setpoint::Sequence;
use solar_sim::domain::state::OperationalState;
use solar_sim::infrastructure::config::{HubConfig, load_hub_config};
use solar_sim::infrastructure::logging::init_tracing;
use solar_sim::infrastructure::trajectory::load_trajectory;
use solar_sim::infrastructure::transport::serve_panels;
use solar_sim::presentation::{app_state::AppState, router};

fn build_sequence(config: &HubConfig) -> anyhow::Result<Sequence> {
    let sequence = match &config.trajectory {
        Some(path) => load_trajectory(path, config.expected_clients)
            .with_context(|| format!("loading trajectory {}", path.display()))?,
        None => Sequence::rotation(
            config.expected_clients,
            config.rotation.steps,
            config.rotation.peak,
            &config.rotation.channels,
        )?,
    };
    if !sequence.covers(config.expected_clients) {
        bail!("setpoint sequence does not cover {} clients", config.expected_clients);
    }
    Ok(sequence)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_hub_config()?;
    init_tracing(config.verbose);

    let sequence = build_sequence(&config)?;
    let initial_state = if config.safe_mode {
        OperationalState::Safe
    } else {
        OperationalState::Normal
    };
    tracing::info!(
        frames = sequence.len(),
        expected_clients = config.expected_clients,
        state = %initial_state,
        "hub starting"
    );

    let coordinator = Arc::new(HubCoordinator::new(sequence, config.expected_clients, initial_state));
    tokio::spawn(coordinator.clone().run_tick_loop(config.refresh_interval()));

    let panel_addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("invalid panel bind address")?;
    let panel_listener = tokio::net::TcpListener::bind(panel_addr).await?;
    tracing::info!(%panel_addr, "listening for panels");
    tokio::spawn(serve_panels(panel_listener, coordinator.clone(), config.connection_limit()));

    let control_addr: SocketAddr = format!("{}:{}", config.bind, config.control_port)
        .parse()
        .context("invalid control bind address")?;
    let app = router(Arc::new(AppState { coordinator }));
    tracing::info!(%control_addr, "control API listening");
    axum::serve(tokio::net::TcpListener::bind(control_addr).await?, app).await?;

    Ok(())
}
