// Messages exchanged between the hub and the panels
use super::channel::RawLevels;
use super::setpoint::ClientId;
use super::state::OperationalState;
use super::thermal::ThermalReadings;
use serde::{Deserialize, Serialize};

/// Guardian state as reported in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GuardianState {
    #[default]
    Armed,
    Tripped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub client_id: ClientId,
    pub thermal: ThermalReadings,
    /// Photodiode voltage, `None` when the read failed.
    pub photodiode: Option<f64>,
    #[serde(default)]
    pub guardian: GuardianState,
}

/// Panel -> hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelMessage {
    Register { client_id: ClientId },
    Telemetry(TelemetryReport),
}

/// Hub -> panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    RegistrationAck { client_id: ClientId },
    StateChange { state: OperationalState },
    Setpoint { levels: RawLevels },
}

impl HubMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HubMessage::RegistrationAck { .. } => "registration_ack",
            HubMessage::StateChange { .. } => "state_change",
            HubMessage::Setpoint { .. } => "setpoint",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::channel::Channel;
    use crate::domain::thermal::ThermalProbe;

    #[test]
    fn test_wire_shape() {
        let msg = HubMessage::StateChange {
            state: OperationalState::Halt,
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"state_change","state":"halt"}"#
        );

        let register: PanelMessage = serde_json::from_str(r#"{"type":"register","client_id":2}"#).unwrap();
        assert_eq!(register, PanelMessage::Register { client_id: 2 });
    }

    #[test]
    fn test_telemetry_carries_unreadable_probe() {
        let report = TelemetryReport {
            client_id: 1,
            thermal: ThermalReadings::from([(ThermalProbe::Led, Some(41.5)), (ThermalProbe::Cell, None)]),
            photodiode: Some(1.2),
            guardian: GuardianState::Tripped,
        };
        let json = serde_json::to_string(&PanelMessage::Telemetry(report.clone())).unwrap();
        assert!(json.contains(r#""type":"telemetry""#));
        assert!(json.contains(r#""cell":null"#));
        let back: PanelMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PanelMessage::Telemetry(report));
    }

    #[test]
    fn test_setpoint_accepts_out_of_range_numbers() {
        let msg: HubMessage =
            serde_json::from_str(r#"{"type":"setpoint","levels":{"red":150,"uv":-3}}"#).unwrap();
        let HubMessage::Setpoint { levels } = msg else {
            panic!("expected setpoint");
        };
        assert_eq!(levels[&Channel::Red], 150);
        assert_eq!(levels[&Channel::Uv], -3);
    }
}
