// Light channels and commanded levels
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One light source on a panel. The LED colours and UV sit on the DAC,
/// the halogen bulb is driven by PWM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
    Uv,
    Halogen,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Red,
        Channel::Green,
        Channel::Blue,
        Channel::Uv,
        Channel::Halogen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
            Channel::Uv => "uv",
            Channel::Halogen => "halogen",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Highest percentage a setpoint may carry.
pub const MAX_PERCENT: u8 = 100;

/// Validated per-channel intensity percentages (0..=100).
pub type Levels = BTreeMap<Channel, u8>;

/// Raw per-channel actuator values, as written to hardware.
pub type ActuatorFrame = BTreeMap<Channel, u16>;

/// Percentages as they arrive over the wire, before range checks.
pub type RawLevels = BTreeMap<Channel, i64>;

pub fn to_raw(levels: &Levels) -> RawLevels {
    levels.iter().map(|(c, p)| (*c, i64::from(*p))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serializes_lowercase() {
        let mut levels = Levels::new();
        levels.insert(Channel::Uv, 10);
        levels.insert(Channel::Halogen, 55);
        let json = serde_json::to_string(&levels).unwrap();
        assert_eq!(json, r#"{"uv":10,"halogen":55}"#);

        let back: RawLevels = serde_json::from_str(&json).unwrap();
        assert_eq!(back[&Channel::Halogen], 55);
    }
}
