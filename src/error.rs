// Error taxonomy shared by the hub and the panels
use crate::domain::setpoint::ClientId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolarError {
    /// Transport-level failure; drives the reconnect loop on panels.
    #[error("connection fault: {0}")]
    ConnectionFault(String),

    #[error("client {client_id} re-registered, replacing connection {previous}")]
    RegistrationConflict { client_id: ClientId, previous: u64 },

    #[error("client id {client_id} outside 0..{expected}")]
    UnknownClient { client_id: ClientId, expected: usize },

    #[error("sensor fault on {probe}: {reason}")]
    SensorFault { probe: String, reason: String },

    #[error("percentage {value} for channel {channel} outside 0..=100")]
    CommandOutOfRange { channel: String, value: i64 },

    #[error("waiting for quorum: {registered}/{expected} clients registered")]
    QuorumNotMet { registered: usize, expected: usize },

    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("trajectory error: {0}")]
    Trajectory(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SolarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = SolarError::QuorumNotMet {
            registered: 2,
            expected: 4,
        };
        assert_eq!(err.to_string(), "waiting for quorum: 2/4 clients registered");

        let err = SolarError::CommandOutOfRange {
            channel: "red".to_string(),
            value: 140,
        };
        assert!(err.to_string().contains("140"));
    }

    #[test]
    fn test_protocol_error_from_serde() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: SolarError = parse.unwrap_err().into();
        assert!(matches!(err, SolarError::Protocol(_)));
    }
}
