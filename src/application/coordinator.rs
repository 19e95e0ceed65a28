// Hub coordinator - registry, periodic broadcast and global state
use crate::application::registry::{ConnectionHandle, SessionRegistry};
use crate::domain::channel::to_raw;
use crate::domain::message::{HubMessage, TelemetryReport};
use crate::domain::setpoint::{ClientId, Sequence};
use crate::domain::state::OperationalState;
use crate::error::{Result, SolarError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

/// Decides whether incoming telemetry should move the global state.
pub trait TelemetryPolicy: Send + Sync {
    fn evaluate(&self, report: &TelemetryReport, current: OperationalState) -> Option<OperationalState>;
}

/// Records telemetry and never changes state.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassivePolicy;

impl TelemetryPolicy for PassivePolicy {
    fn evaluate(&self, _report: &TelemetryReport, _current: OperationalState) -> Option<OperationalState> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame `index` went out; `failed` clients could not be reached.
    Broadcast { index: usize, sent: usize, failed: usize },
    /// Quorum not met, nothing sent and the index did not move.
    Waiting { registered: usize, expected: usize },
}

pub struct HubCoordinator {
    registry: SessionRegistry,
    expected_clients: usize,
    sequence: Sequence,
    index: AtomicUsize,
    had_quorum: AtomicBool,
    state: RwLock<OperationalState>,
    policy: Box<dyn TelemetryPolicy>,
}

impl HubCoordinator {
    pub fn new(sequence: Sequence, expected_clients: usize, initial_state: OperationalState) -> Self {
        Self {
            registry: SessionRegistry::new(),
            expected_clients,
            sequence,
            index: AtomicUsize::new(0),
            had_quorum: AtomicBool::new(false),
            state: RwLock::new(initial_state),
            policy: Box::new(PassivePolicy),
        }
    }

    pub fn with_policy(mut self, policy: impl TelemetryPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn expected_clients(&self) -> usize {
        self.expected_clients
    }

    pub fn sequence_index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    pub async fn operational_state(&self) -> OperationalState {
        *self.state.read().await
    }

    /// Bind a client id to a connection, then acknowledge and push the
    /// current state. A duplicate id replaces the older connection.
    pub async fn register_client(&self, client_id: ClientId, handle: ConnectionHandle) -> Result<()> {
        if usize::from(client_id) >= self.expected_clients {
            return Err(SolarError::UnknownClient {
                client_id,
                expected: self.expected_clients,
            });
        }

        // Held until the state is queued so a concurrent state change cannot slip between.
        let state = self.state.read().await;
        if let Some(previous) = self.registry.insert(client_id, handle.clone()).await {
            if previous.handle.id() != handle.id() {
                let conflict = SolarError::RegistrationConflict {
                    client_id,
                    previous: previous.handle.id(),
                };
                tracing::warn!(client_id, connection = handle.id(), "{}", conflict);
                previous.handle.close();
            }
        }
        let registered = self.registry.len().await;
        tracing::info!(
            client_id,
            connection = handle.id(),
            registered,
            expected = self.expected_clients,
            "client registered"
        );

        for msg in [
            HubMessage::RegistrationAck { client_id },
            HubMessage::StateChange { state: *state },
        ] {
            if let Err(e) = handle.send(msg) {
                tracing::warn!(client_id, error = %e, "registration reply not delivered");
            }
        }
        Ok(())
    }

    /// Remove every session served by `handle`. Safe to call repeatedly.
    pub async fn unregister_client(&self, handle: &ConnectionHandle) -> Vec<ClientId> {
        let removed = self.registry.remove_connection(handle.id()).await;
        for client_id in &removed {
            tracing::info!(client_id, connection = handle.id(), "client unregistered");
        }
        removed
    }

    /// One broadcast round. Never fails: per-client faults are logged and skipped.
    pub async fn tick(&self) -> TickOutcome {
        let registered = self.registry.len().await;
        if registered != self.expected_clients {
            let waiting = SolarError::QuorumNotMet {
                registered,
                expected: self.expected_clients,
            };
            if self.had_quorum.swap(false, Ordering::SeqCst) {
                tracing::warn!("quorum lost, pausing broadcast: {}", waiting);
            } else {
                tracing::debug!("{}", waiting);
            }
            return TickOutcome::Waiting {
                registered,
                expected: self.expected_clients,
            };
        }
        if !self.had_quorum.swap(true, Ordering::SeqCst) {
            tracing::info!(clients = registered, "quorum reached, broadcasting");
        }

        let index = self.index.load(Ordering::SeqCst);
        let frame = self.sequence.frame(index);
        let mut sent = 0;
        let mut failed = 0;
        for (client_id, handle) in self.registry.handles().await {
            let Some(levels) = frame.entry(client_id) else {
                tracing::warn!(client_id, index, "sequence has no entry for client");
                failed += 1;
                continue;
            };
            match handle.send(HubMessage::Setpoint { levels: to_raw(levels) }) {
                Ok(()) => {
                    tracing::debug!(client_id, index, ?levels, "setpoint sent");
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(client_id, error = %e, "setpoint not delivered");
                    failed += 1;
                }
            }
        }

        self.index
            .store((index + 1) % self.sequence.len(), Ordering::SeqCst);
        TickOutcome::Broadcast { index, sent, failed }
    }

    /// Change the global state and push it to every registered client at once.
    /// Returns false when the state was already `next`.
    pub async fn set_operational_state(&self, next: OperationalState) -> bool {
        let mut state = self.state.write().await;
        if *state == next {
            return false;
        }
        let previous = *state;
        *state = next;
        tracing::info!(from = %previous, to = %next, "operational state changed");

        for (client_id, handle) in self.registry.handles().await {
            if let Err(e) = handle.send(HubMessage::StateChange { state: next }) {
                tracing::warn!(client_id, error = %e, "state change not delivered");
            }
        }
        true
    }

    /// Record telemetry arriving on `connection`. Reports naming a client
    /// that is not registered on that connection are ignored.
    pub async fn on_telemetry(&self, connection: &ConnectionHandle, report: TelemetryReport) {
        tracing::debug!(
            client_id = report.client_id,
            connection = connection.id(),
            thermal = ?report.thermal,
            photodiode = ?report.photodiode,
            guardian = ?report.guardian,
            "telemetry"
        );
        if !self.registry.record_telemetry(connection.id(), &report).await {
            tracing::warn!(
                client_id = report.client_id,
                connection = connection.id(),
                "telemetry for a client not registered on this connection"
            );
            return;
        }
        let current = self.operational_state().await;
        if let Some(next) = self.policy.evaluate(&report, current) {
            self.set_operational_state(next).await;
        }
    }

    /// Tick forever at `period`. Late ticks are delayed, not bunched.
    pub async fn run_tick_loop(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);
        while ticks.next().await.is_some() {
            self.tick().await;
        }
    }
}
