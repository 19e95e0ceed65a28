// In-memory panel hardware with a first-order thermal model
use crate::application::hardware::{Actuator, SensorBank};
use crate::domain::channel::ActuatorFrame;
use crate::domain::thermal::{ThermalProbe, ThermistorModel};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

const FULL_SCALE: f64 = u16::MAX as f64;

/// Heating characteristics of the simulated panel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThermalModelParams {
    pub ambient: f64,
    /// Temperature rise above ambient at full output, per probe.
    pub led_gain: f64,
    pub heatsink_gain: f64,
    pub cell_gain: f64,
    pub time_constant_secs: f64,
}

impl Default for ThermalModelParams {
    fn default() -> Self {
        Self {
            ambient: 22.0,
            led_gain: 70.0,
            heatsink_gain: 40.0,
            cell_gain: 30.0,
            time_constant_secs: 60.0,
        }
    }
}

impl ThermalModelParams {
    fn gain(&self, probe: ThermalProbe) -> f64 {
        match probe {
            ThermalProbe::Led => self.led_gain,
            ThermalProbe::Heatsink => self.heatsink_gain,
            ThermalProbe::Cell => self.cell_gain,
        }
    }
}

struct SimState {
    frame: Option<ActuatorFrame>,
    writes: usize,
    temps: BTreeMap<ThermalProbe, f64>,
    /// Pinned readings win over the model; `None` simulates an open sensor.
    pinned: BTreeMap<ThermalProbe, Option<f64>>,
    updated: Instant,
}

pub struct SimulatedPanel {
    thermistor: ThermistorModel,
    params: ThermalModelParams,
    state: Mutex<SimState>,
}

impl SimulatedPanel {
    pub fn new(thermistor: ThermistorModel, params: ThermalModelParams) -> Self {
        let temps = ThermalProbe::ALL.iter().map(|p| (*p, params.ambient)).collect();
        Self {
            thermistor,
            params,
            state: Mutex::new(SimState {
                frame: None,
                writes: 0,
                temps,
                pinned: BTreeMap::new(),
                updated: Instant::now(),
            }),
        }
    }

    /// A panel whose probes report fixed temperatures.
    pub fn pinned(thermistor: ThermistorModel, temps: impl IntoIterator<Item = (ThermalProbe, f64)>) -> Self {
        let panel = Self::new(thermistor, ThermalModelParams::default());
        for (probe, celsius) in temps {
            panel.set_temperature(probe, Some(celsius));
        }
        panel
    }

    pub fn set_temperature(&self, probe: ThermalProbe, celsius: Option<f64>) {
        self.lock().pinned.insert(probe, celsius);
    }

    pub fn last_frame(&self) -> Option<ActuatorFrame> {
        self.lock().frame.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(frame: Option<&ActuatorFrame>) -> f64 {
        match frame {
            Some(frame) if !frame.is_empty() => {
                frame.values().map(|v| f64::from(*v) / FULL_SCALE).sum::<f64>() / frame.len() as f64
            }
            _ => 0.0,
        }
    }

    fn advance(&self, state: &mut SimState) {
        let now = Instant::now();
        let dt = now.duration_since(state.updated).as_secs_f64();
        state.updated = now;
        let alpha = 1.0 - (-dt / self.params.time_constant_secs.max(f64::EPSILON)).exp();
        let load = Self::load(state.frame.as_ref());
        for (probe, temp) in state.temps.iter_mut() {
            let target = self.params.ambient + self.params.gain(*probe) * load;
            *temp += (target - *temp) * alpha;
        }
    }
}

#[async_trait]
impl Actuator for SimulatedPanel {
    async fn apply(&self, frame: &ActuatorFrame) -> Result<()> {
        let mut state = self.lock();
        self.advance(&mut state);
        state.frame = Some(frame.clone());
        state.writes += 1;
        Ok(())
    }
}

#[async_trait]
impl SensorBank for SimulatedPanel {
    async fn thermistor_voltage(&self, probe: ThermalProbe) -> Result<f64> {
        let mut state = self.lock();
        self.advance(&mut state);
        let celsius = match state.pinned.get(&probe) {
            Some(pinned) => *pinned,
            None => state.temps.get(&probe).copied(),
        };
        // an open thermistor reads as 0V on the divider
        Ok(celsius.map_or(0.0, |c| self.thermistor.voltage(c)))
    }

    async fn photodiode(&self) -> Result<f64> {
        let state = self.lock();
        Ok(self.thermistor.supply_voltage * Self::load(state.frame.as_ref()))
    }
}
