// Application layer - Hub coordination and panel control
pub mod coordinator;
pub mod guardian;
pub mod hardware;
pub mod panel_agent;
pub mod registry;
