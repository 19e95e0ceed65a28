// Global operational state, owned by the hub and mirrored by each panel
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default fraction of the calibrated range allowed in [`OperationalState::Safe`].
pub const DEFAULT_SAFE_LIMITER: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationalState {
    /// All lamps off.
    Halt,
    /// Full calibrated range.
    #[default]
    Normal,
    /// Reduced range, hazard channels off.
    Safe,
}

impl OperationalState {
    /// Limiter applied to every channel's ceiling in this state.
    pub fn limiter(&self, safe_limiter: f64) -> f64 {
        match self {
            OperationalState::Halt => 0.0,
            OperationalState::Normal => 1.0,
            OperationalState::Safe => safe_limiter,
        }
    }

    pub fn disables_hazards(&self) -> bool {
        matches!(self, OperationalState::Safe)
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationalState::Halt => "halt",
            OperationalState::Normal => "normal",
            OperationalState::Safe => "safe",
        };
        f.write_str(name)
    }
}
