// Session registry - which connection serves which client id
use crate::domain::message::{HubMessage, TelemetryReport};
use crate::domain::setpoint::ClientId;
use crate::error::{Result, SolarError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock, mpsc};

/// Outbound side of one panel connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<HubMessage>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: u64, tx: mpsc::Sender<HubMessage>) -> Self {
        Self {
            id,
            tx,
            close: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the transport to drop this connection. Remembered until awaited.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once `close` has been called on any clone of this handle.
    pub async fn closed(&self) {
        self.close.notified().await;
    }

    /// Queue a message without waiting. A full queue or a closed connection
    /// is reported, never retried.
    pub fn send(&self, msg: HubMessage) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(m) => SolarError::ConnectionFault(format!(
                "connection {} backlogged, dropped {}",
                self.id,
                m.kind()
            )),
            mpsc::error::TrySendError::Closed(m) => SolarError::ConnectionFault(format!(
                "connection {} closed, dropped {}",
                self.id,
                m.kind()
            )),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub client_id: ClientId,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
    pub last_telemetry: Option<TelemetryReport>,
}

/// Serializable view of a session for the control API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub client_id: ClientId,
    pub connection: u64,
    pub connected_at: DateTime<Utc>,
    pub last_telemetry: Option<TelemetryReport>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ClientId, ClientSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `client_id` to `handle`. Returns the session it replaced, if any.
    pub async fn insert(&self, client_id: ClientId, handle: ConnectionHandle) -> Option<ClientSession> {
        let session = ClientSession {
            client_id,
            handle,
            connected_at: Utc::now(),
            last_telemetry: None,
        };
        self.sessions.write().await.insert(client_id, session)
    }

    /// Drop every session bound to the connection. Returns the ids removed.
    pub async fn remove_connection(&self, connection: u64) -> Vec<ClientId> {
        let mut sessions = self.sessions.write().await;
        let removed: Vec<ClientId> = sessions
            .iter()
            .filter(|(_, s)| s.handle.id() == connection)
            .map(|(id, _)| *id)
            .collect();
        for id in &removed {
            sessions.remove(id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Handles ordered by client id.
    pub async fn handles(&self) -> Vec<(ClientId, ConnectionHandle)> {
        let sessions = self.sessions.read().await;
        let mut handles: Vec<_> = sessions.values().map(|s| (s.client_id, s.handle.clone())).collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    /// Store a telemetry report on its session. False when the client is not
    /// registered on `connection`.
    pub async fn record_telemetry(&self, connection: u64, report: &TelemetryReport) -> bool {
        match self.sessions.write().await.get_mut(&report.client_id) {
            Some(session) if session.handle.id() == connection => {
                session.last_telemetry = Some(report.clone());
                true
            }
            _ => false,
        }
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<_> = sessions
            .values()
            .map(|s| SessionSummary {
                client_id: s.client_id,
                connection: s.handle.id(),
                connected_at: s.connected_at,
                last_telemetry: s.last_telemetry.clone(),
            })
            .collect();
        summaries.sort_by_key(|s| s.client_id);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> (ConnectionHandle, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(4);
        (ConnectionHandle::new(id, tx), rx)
    }

    #[tokio::test]
    async fn test_reregistration_keeps_latest_handle() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = handle(1);
        let (second, _rx2) = handle(2);

        assert!(registry.insert(2, first).await.is_none());
        let replaced = registry.insert(2, second).await.unwrap();
        assert_eq!(replaced.handle.id(), 1);

        assert_eq!(registry.len().await, 1);
        let handles = registry.handles().await;
        assert_eq!(handles[0].0, 2);
        assert_eq!(handles[0].1.id(), 2);
    }

    #[tokio::test]
    async fn test_remove_connection_is_idempotent() {
        let registry = SessionRegistry::new();
        let (a, _rx) = handle(7);
        registry.insert(0, a.clone()).await;
        registry.insert(3, a).await;

        let mut removed = registry.remove_connection(7).await;
        removed.sort();
        assert_eq!(removed, vec![0, 3]);
        assert!(registry.remove_connection(7).await.is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_send_reports_closed_connection() {
        let (h, rx) = handle(9);
        drop(rx);
        let err = h
            .send(HubMessage::RegistrationAck { client_id: 0 })
            .unwrap_err();
        assert!(matches!(err, SolarError::ConnectionFault(_)));
    }

    #[tokio::test]
    async fn test_telemetry_for_unknown_client_is_not_recorded() {
        let registry = SessionRegistry::new();
        let report = TelemetryReport {
            client_id: 1,
            thermal: Default::default(),
            photodiode: None,
            guardian: Default::default(),
        };
        assert!(!registry.record_telemetry(4, &report).await);
    }

    #[tokio::test]
    async fn test_telemetry_only_recorded_from_bound_connection() {
        let registry = SessionRegistry::new();
        let (owner, _rx1) = handle(1);
        let (other, _rx2) = handle(2);
        registry.insert(0, owner).await;
        registry.insert(1, other).await;

        let report = TelemetryReport {
            client_id: 0,
            thermal: Default::default(),
            photodiode: Some(1.5),
            guardian: Default::default(),
        };
        assert!(!registry.record_telemetry(2, &report).await);
        assert!(registry.summaries().await[0].last_telemetry.is_none());

        assert!(registry.record_telemetry(1, &report).await);
        assert_eq!(registry.summaries().await[0].last_telemetry, Some(report));
    }

    #[tokio::test]
    async fn test_close_is_seen_by_every_clone() {
        let (h, _rx) = handle(3);
        let transport_side = h.clone();
        h.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), transport_side.closed())
            .await
            .unwrap();
    }
}
