// Domain layer - Panel, calibration and thermal models
pub mod calibration;
pub mod channel;
pub mod message;
pub mod setpoint;
pub mod state;
pub mod thermal;
