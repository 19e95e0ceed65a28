use crate::domain::calibration::{CalibrationProfile, default_profile};
use crate::domain::channel::Channel;
use crate::domain::setpoint::ClientId;
use crate::domain::state::DEFAULT_SAFE_LIMITER;
use crate::domain::thermal::{SafetyThresholds, SensorFaultPolicy, ThermistorModel};
use crate::infrastructure::simulated::ThermalModelParams;
use anyhow::bail;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HubConfig {
    pub bind: String,
    /// Port the panels connect to.
    pub port: u16,
    /// Port of the HTTP control API.
    pub control_port: u16,
    pub refresh_interval_ms: u64,
    pub expected_clients: usize,
    /// Concurrent panel connections accepted; twice `expected_clients` when unset.
    pub max_connections: Option<usize>,
    pub verbose: bool,
    /// Start in safe mode instead of normal.
    pub safe_mode: bool,
    /// Precomputed trajectory; the rotation pattern is used when absent.
    pub trajectory: Option<PathBuf>,
    pub rotation: RotationConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            control_port: 8080,
            refresh_interval_ms: 1000,
            expected_clients: 4,
            max_connections: None,
            verbose: false,
            safe_mode: false,
            trajectory: None,
            rotation: RotationConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn connection_limit(&self) -> usize {
        self.max_connections.unwrap_or(self.expected_clients * 2)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.expected_clients == 0 || self.expected_clients > usize::from(ClientId::MAX) + 1 {
            bail!("expected_clients must be between 1 and 256, got {}", self.expected_clients);
        }
        if self.refresh_interval_ms == 0 {
            bail!("refresh_interval_ms must be positive");
        }
        if self.connection_limit() <= self.expected_clients {
            bail!(
                "max_connections must exceed expected_clients ({}) to let panels reconnect",
                self.expected_clients
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RotationConfig {
    /// Frames per revolution.
    pub steps: usize,
    /// Peak intensity as a fraction of full scale.
    pub peak: f64,
    pub channels: Vec<Channel>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            steps: 120,
            peak: 1.0,
            channels: Channel::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PanelConfig {
    pub hub_host: String,
    pub hub_port: u16,
    pub client_id: ClientId,
    pub retry_delay_ms: u64,
    pub thermal_poll_ms: u64,
    pub telemetry_interval_ms: u64,
    pub verbose: bool,
    pub safe_limiter: f64,
    pub sensor_fault_policy: SensorFaultPolicy,
    pub thresholds: SafetyThresholds,
    pub thermistor: ThermistorModel,
    pub channels: CalibrationProfile,
    pub simulation: ThermalModelParams,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            hub_host: "127.0.0.1".to_string(),
            hub_port: 8000,
            client_id: 0,
            retry_delay_ms: 5000,
            thermal_poll_ms: 1000,
            telemetry_interval_ms: 5000,
            verbose: false,
            safe_limiter: DEFAULT_SAFE_LIMITER,
            sensor_fault_policy: SensorFaultPolicy::default(),
            thresholds: SafetyThresholds::default(),
            thermistor: ThermistorModel::default(),
            channels: default_profile(),
            simulation: ThermalModelParams::default(),
        }
    }
}

impl PanelConfig {
    pub fn hub_address(&self) -> String {
        format!("{}:{}", self.hub_host, self.hub_port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.thresholds.validate()?;
        if !(0.0..=1.0).contains(&self.safe_limiter) {
            bail!("safe_limiter must be within 0..=1, got {}", self.safe_limiter);
        }
        for (channel, cal) in &self.channels {
            if cal.start_value > cal.max_value {
                bail!(
                    "{} start_value {} above max_value {}",
                    channel,
                    cal.start_value,
                    cal.max_value
                );
            }
        }
        if self.thermal_poll_ms == 0 || self.telemetry_interval_ms == 0 {
            bail!("poll and telemetry intervals must be positive");
        }
        Ok(())
    }
}

fn load<T: serde::de::DeserializeOwned>(path_var: &str, default_path: &str, env_prefix: &str) -> anyhow::Result<T> {
    let path = std::env::var(path_var).unwrap_or_else(|_| default_path.to_string());
    let settings = config::Config::builder()
        .add_source(config::File::with_name(&path).required(false))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_hub_config() -> anyhow::Result<HubConfig> {
    let config: HubConfig = load("SOLAR_HUB_CONFIG", "config/hub", "SOLAR_HUB")?;
    config.validate()?;
    Ok(config)
}

pub fn load_panel_config() -> anyhow::Result<PanelConfig> {
    let config: PanelConfig = load("SOLAR_PANEL_CONFIG", "config/panel", "SOLAR_PANEL")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PANEL_TOML: &str = r#"
        hub_host = "192.168.6.1"
        client_id = 2
        sensor_fault_policy = "fail_open"

        [thresholds]
        led_shutdown = 95.0
        resume = 40.0

        [channels.red]
        start_value = 10756
        max_value = 65535

        [channels.uv]
        start_value = 10620
        max_value = 65535
        enabled = false
    "#;

    #[test]
    fn test_panel_config_from_toml() {
        let config: PanelConfig = toml::from_str(PANEL_TOML).unwrap();
        assert_eq!(config.hub_address(), "192.168.6.1:8000");
        assert_eq!(config.client_id, 2);
        assert_eq!(config.sensor_fault_policy, SensorFaultPolicy::FailOpen);
        assert_eq!(config.thresholds.led_shutdown, 95.0);
        assert_eq!(config.thresholds.heatsink_shutdown, 85.0);
        assert_eq!(config.channels.len(), 2);
        assert!(!config.channels[&Channel::Uv].enabled);
        assert!(config.channels[&Channel::Red].enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_panel_config_layers_file_source() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(PANEL_TOML, config::FileFormat::Toml))
            .build()
            .unwrap();
        let config: PanelConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.client_id, 2);
        assert_eq!(config.retry_delay_ms, 5000);
    }

    #[test]
    fn test_panel_config_rejects_inverted_hysteresis() {
        let config = PanelConfig {
            thresholds: SafetyThresholds {
                resume: 120.0,
                ..SafetyThresholds::default()
            },
            ..PanelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hub_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.expected_clients, 4);
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
        assert!(!config.safe_mode);
        assert_eq!(config.connection_limit(), 8);
        assert!(config.validate().is_ok());

        // no headroom left for a reconnecting panel
        let config = HubConfig {
            max_connections: Some(4),
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HubConfig {
            expected_clients: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
