// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod logging;
pub mod simulated;
pub mod trajectory;
pub mod transport;
