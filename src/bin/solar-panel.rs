// Panel entry point - wires the simulated hardware to the hub link
use std::{sync::Arc, time::Duration};

use solar_sim::application::guardian::{ThermalGuardian, run_guardian};
use solar_sim::application::panel_agent::{PanelAgent, PanelSettings};
use solar_sim::infrastructure::config::load_panel_config;
use solar_sim::infrastructure::logging::init_tracing;
use solar_sim::infrastructure::simulated::SimulatedPanel;
use solar_sim::infrastructure::transport::run_panel_link;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_panel_config()?;
    init_tracing(config.verbose);
    tracing::info!(client_id = config.client_id, hub = %config.hub_address(), "panel starting");

    let hardware = Arc::new(SimulatedPanel::new(config.thermistor, config.simulation.clone()));
    let guardian = ThermalGuardian::new(config.thresholds, config.sensor_fault_policy)?;
    let settings = PanelSettings {
        client_id: config.client_id,
        profile: config.channels.clone(),
        safe_limiter: config.safe_limiter,
        thermistor: config.thermistor,
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let agent = Arc::new(PanelAgent::new(
        settings,
        guardian,
        hardware.clone(),
        hardware,
        outbound_tx,
    ));
    let inbox = agent.spawn_executor();

    tokio::spawn(run_guardian(agent.clone(), Duration::from_millis(config.thermal_poll_ms)));
    tokio::spawn(
        agent
            .clone()
            .run_telemetry_loop(Duration::from_millis(config.telemetry_interval_ms)),
    );

    run_panel_link(
        config.hub_address(),
        agent.register_message(),
        inbox,
        outbound_rx,
        Duration::from_millis(config.retry_delay_ms),
    )
    .await;

    Ok(())
}
