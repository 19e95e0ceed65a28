// Calibration engine: percentage -> raw actuator value lookup tables
use super::channel::{ActuatorFrame, Channel, Levels, MAX_PERCENT};
use super::state::OperationalState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STEPS: usize = MAX_PERCENT as usize + 1;

/// Bench calibration for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    /// Lowest raw value at which the source emits light.
    pub start_value: u16,
    /// Raw value at full intensity.
    pub max_value: u16,
    /// Disabled channels always resolve to zero.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hazard channels resolve to zero while the panel is in safe mode.
    #[serde(default)]
    pub hazard: bool,
}

fn default_true() -> bool {
    true
}

impl ChannelCalibration {
    pub fn new(start_value: u16, max_value: u16) -> Self {
        Self {
            start_value,
            max_value,
            enabled: true,
            hazard: false,
        }
    }

    pub fn hazard(mut self) -> Self {
        self.hazard = true;
        self
    }
}

/// Per-channel calibration for a whole panel.
pub type CalibrationProfile = BTreeMap<Channel, ChannelCalibration>;

/// Calibration measured on the reference panel.
pub fn default_profile() -> CalibrationProfile {
    BTreeMap::from([
        (Channel::Red, ChannelCalibration::new(10756, 65535)),
        (Channel::Green, ChannelCalibration::new(10140, 65535)),
        (Channel::Blue, ChannelCalibration::new(10620, 65535)),
        (Channel::Uv, ChannelCalibration::new(10620, 65535).hazard()),
        (Channel::Halogen, ChannelCalibration::new(0, 65535)),
    ])
}

/// 101 monotonically non-decreasing actuator values indexed by percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationTable {
    values: [u16; STEPS],
}

impl CalibrationTable {
    /// Linear interpolation from `start` up to `round(max * limiter)`.
    ///
    /// When the limited ceiling falls below the start value the source cannot
    /// light inside the limit at all, so the table is all zeros.
    pub fn build(start: u16, max: u16, limiter: f64) -> Self {
        let limiter = if limiter.is_finite() { limiter.clamp(0.0, 1.0) } else { 0.0 };
        let ceiling = (f64::from(max) * limiter).round() as i64;
        let start = i64::from(start);
        if ceiling < start {
            return Self::zeroed();
        }

        let mut values = [0u16; STEPS];
        for (p, value) in values.iter_mut().enumerate() {
            let step = start + (p as i64) * (ceiling - start) / MAX_PERCENT as i64;
            *value = step as u16;
        }
        Self { values }
    }

    pub fn zeroed() -> Self {
        Self { values: [0; STEPS] }
    }

    /// Percentages above 100 saturate at the top of the table.
    pub fn lookup(&self, percent: u8) -> u16 {
        self.values[usize::from(percent.min(MAX_PERCENT))]
    }

    pub fn ceiling(&self) -> u16 {
        self.values[STEPS - 1]
    }

    pub fn values(&self) -> &[u16] {
        &self.values
    }
}

/// The tables of every configured channel for one operational state.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    tables: BTreeMap<Channel, CalibrationTable>,
}

impl CalibrationSet {
    pub fn build(profile: &CalibrationProfile, state: OperationalState, safe_limiter: f64) -> Self {
        let limiter = state.limiter(safe_limiter);
        let tables = profile
            .iter()
            .map(|(channel, cal)| {
                let table = if !cal.enabled || (cal.hazard && state.disables_hazards()) {
                    CalibrationTable::zeroed()
                } else {
                    CalibrationTable::build(cal.start_value, cal.max_value, limiter)
                };
                (*channel, table)
            })
            .collect();
        Self { tables }
    }

    pub fn table(&self, channel: Channel) -> Option<&CalibrationTable> {
        self.tables.get(&channel)
    }

    /// Resolve commanded percentages into raw values. Every configured
    /// channel gets a value; channels with no commanded level resolve to 0.
    pub fn resolve(&self, levels: &Levels) -> ActuatorFrame {
        self.tables
            .iter()
            .map(|(channel, table)| {
                let value = levels.get(channel).map_or(0, |p| table.lookup(*p));
                (*channel, value)
            })
            .collect()
    }

    /// A frame with every configured channel at zero.
    pub fn dark_frame(&self) -> ActuatorFrame {
        self.tables.keys().map(|c| (*c, 0)).collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.tables.keys().copied()
    }
}
