// Thermal domain: probes, thermistor transform, shutdown thresholds
use crate::error::{Result, SolarError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const KELVIN_OFFSET: f64 = 273.15;

/// Monitored temperature probe. Each one belongs to its own threshold group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalProbe {
    Led,
    Heatsink,
    Cell,
}

impl ThermalProbe {
    pub const ALL: [ThermalProbe; 3] = [ThermalProbe::Led, ThermalProbe::Heatsink, ThermalProbe::Cell];
}

impl fmt::Display for ThermalProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThermalProbe::Led => "led",
            ThermalProbe::Heatsink => "heatsink",
            ThermalProbe::Cell => "cell",
        };
        f.write_str(name)
    }
}

/// Celsius per probe; `None` marks an unreadable sensor.
pub type ThermalReadings = BTreeMap<ThermalProbe, Option<f64>>;

/// NTC thermistor in a voltage divider against a fixed resistor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermistorModel {
    pub beta: f64,
    pub r_ref: f64,
    pub t_ref_kelvin: f64,
    pub r_fixed: f64,
    pub supply_voltage: f64,
}

impl Default for ThermistorModel {
    fn default() -> Self {
        Self {
            beta: 3977.0,
            r_ref: 10_000.0,
            t_ref_kelvin: 298.15,
            r_fixed: 10_000.0,
            supply_voltage: 3.3,
        }
    }
}

impl ThermistorModel {
    /// Convert a divider voltage to Celsius. Anything that would divide by
    /// zero, take the log of a non-positive value or come out non-finite is
    /// reported as unreadable.
    pub fn celsius(&self, voltage: f64) -> Option<f64> {
        if !(voltage > 0.0 && voltage < self.supply_voltage) {
            return None;
        }
        let resistance = self.r_fixed * voltage / (self.supply_voltage - voltage);
        let ratio = resistance / self.r_ref;
        if !ratio.is_finite() || ratio <= 0.0 {
            return None;
        }
        let inverse = ratio.ln() / self.beta + 1.0 / self.t_ref_kelvin;
        if !inverse.is_finite() || inverse <= 0.0 {
            return None;
        }
        let celsius = 1.0 / inverse - KELVIN_OFFSET;
        celsius.is_finite().then_some(celsius)
    }

    /// Divider voltage the sensor would produce at `celsius`.
    pub fn voltage(&self, celsius: f64) -> f64 {
        let kelvin = celsius + KELVIN_OFFSET;
        let resistance = self.r_ref * (self.beta * (1.0 / kelvin - 1.0 / self.t_ref_kelvin)).exp();
        self.supply_voltage * resistance / (self.r_fixed + resistance)
    }
}

/// How an unreadable probe is treated by the guardian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorFaultPolicy {
    /// Unreadable trips the guardian and blocks resume.
    #[default]
    FailClosed,
    /// Unreadable is ignored.
    FailOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    pub led_shutdown: f64,
    pub heatsink_shutdown: f64,
    pub cell_shutdown: f64,
    /// Every probe must be at or below this before output resumes.
    pub resume: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            led_shutdown: 100.0,
            heatsink_shutdown: 85.0,
            cell_shutdown: 70.0,
            resume: 45.0,
        }
    }
}

impl SafetyThresholds {
    pub fn shutdown(&self, probe: ThermalProbe) -> f64 {
        match probe {
            ThermalProbe::Led => self.led_shutdown,
            ThermalProbe::Heatsink => self.heatsink_shutdown,
            ThermalProbe::Cell => self.cell_shutdown,
        }
    }

    /// The resume temperature must sit strictly below every shutdown
    /// threshold, otherwise the guardian could oscillate at the boundary.
    pub fn validate(&self) -> Result<()> {
        for probe in ThermalProbe::ALL {
            let shutdown = self.shutdown(probe);
            if !shutdown.is_finite() || !self.resume.is_finite() || self.resume >= shutdown {
                return Err(SolarError::Config(format!(
                    "resume temperature {} must be below the {} shutdown threshold {}",
                    self.resume, probe, shutdown
                )));
            }
        }
        Ok(())
    }
}
