// Capability traits for panel hardware access
use crate::domain::channel::ActuatorFrame;
use crate::domain::thermal::ThermalProbe;
use crate::error::Result;
use async_trait::async_trait;

/// Light outputs (DAC channels and the halogen PWM).
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Write raw values for every channel in the frame.
    async fn apply(&self, frame: &ActuatorFrame) -> Result<()>;
}

/// Analog inputs of a panel.
#[async_trait]
pub trait SensorBank: Send + Sync {
    /// Divider voltage of the thermistor on `probe`.
    async fn thermistor_voltage(&self, probe: ThermalProbe) -> Result<f64>;

    /// Photodiode voltage.
    async fn photodiode(&self) -> Result<f64>;
}
