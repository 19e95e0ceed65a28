// Newline-delimited JSON over TCP between the hub and its panels
use crate::application::coordinator::HubCoordinator;
use crate::application::panel_agent::PanelInbox;
use crate::application::registry::ConnectionHandle;
use crate::domain::message::{HubMessage, PanelMessage};
use crate::error::{Result, SolarError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};

/// Per-connection outbound queue. Sends beyond this are dropped, not awaited.
const CONNECTION_QUEUE: usize = 32;

pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}

async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode(msg)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Accept panel connections forever, at most `max_connections` at a time.
/// The limit should leave room above the expected client count so a
/// reconnecting panel can get in and displace its stale session.
pub async fn serve_panels(listener: TcpListener, coordinator: Arc<HubCoordinator>, max_connections: usize) {
    let slots = Arc::new(Semaphore::new(max_connections));
    let next_id = AtomicU64::new(1);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let Ok(slot) = Arc::clone(&slots).try_acquire_owned() else {
            tracing::warn!(%peer, max_connections, "connection limit reached, refusing panel");
            drop(stream);
            continue;
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%peer, connection = id, "panel connected");
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            handle_panel(stream, id, &coordinator).await;
            tracing::info!(%peer, connection = id, "panel disconnected");
            drop(slot);
        });
    }
}

async fn handle_panel(stream: TcpStream, id: u64, coordinator: &HubCoordinator) {
    let (read, mut write) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<HubMessage>(CONNECTION_QUEUE);
    let handle = ConnectionHandle::new(id, tx);

    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut write, &msg).await {
                tracing::warn!(connection = id, error = %e, "write to panel failed");
                break;
            }
        }
    });

    let mut lines = BufReader::new(read).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match decode::<PanelMessage>(&line) {
                    Ok(PanelMessage::Register { client_id }) => {
                        if let Err(e) = coordinator.register_client(client_id, handle.clone()).await {
                            tracing::warn!(connection = id, error = %e, "registration refused");
                        }
                    }
                    Ok(PanelMessage::Telemetry(report)) => coordinator.on_telemetry(&handle, report).await,
                    Err(e) => tracing::warn!(connection = id, error = %e, "dropping malformed message"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(connection = id, error = %e, "read from panel failed");
                    break;
                }
            },
            // a dead writer means the socket is gone even if reads still block
            _ = &mut writer => break,
            () = handle.closed() => {
                tracing::info!(connection = id, "connection displaced by a newer registration");
                break;
            }
        }
    }

    coordinator.unregister_client(&handle).await;
    // cancels only this panel's pending sends
    writer.abort();
}

/// Keep a panel connected to the hub forever, retrying after `retry_delay`.
pub async fn run_panel_link(
    address: String,
    register: PanelMessage,
    inbox: PanelInbox,
    mut outbound: mpsc::Receiver<PanelMessage>,
    retry_delay: Duration,
) {
    loop {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                tracing::info!(%address, "connected to hub");
                match panel_session(stream, &register, &inbox, &mut outbound).await {
                    Ok(()) => tracing::warn!(%address, "hub closed the connection"),
                    Err(e) => tracing::warn!(%address, error = %e, "hub connection lost"),
                }
            }
            Err(e) => {
                let fault = SolarError::ConnectionFault(e.to_string());
                tracing::warn!(%address, "{}", fault);
            }
        }
        tracing::info!(%address, delay_ms = retry_delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(retry_delay).await;
    }
}

async fn panel_session(
    stream: TcpStream,
    register: &PanelMessage,
    inbox: &PanelInbox,
    outbound: &mut mpsc::Receiver<PanelMessage>,
) -> Result<()> {
    let (read, mut write) = stream.into_split();

    // reports queued while disconnected are stale
    while outbound.try_recv().is_ok() {}
    write_message(&mut write, register).await?;

    let mut lines = BufReader::new(read).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match decode::<HubMessage>(&line) {
                    Ok(msg) => inbox.deliver(msg).await,
                    Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
                },
                None => return Ok(()),
            },
            msg = outbound.recv() => match msg {
                Some(msg) => write_message(&mut write, &msg).await?,
                None => return Err(SolarError::ConnectionFault("telemetry queue closed".to_string())),
            },
        }
    }
}
