// Trajectory files produced by the orbit simulation
use crate::domain::channel::{Channel, MAX_PERCENT};
use crate::domain::setpoint::{ClientId, Sequence, SetpointFrame};
use crate::error::{Result, SolarError};
use std::collections::BTreeMap;
use std::path::Path;

/// One timestep: per-client levels, indexed by client id.
type RawTimestep = Vec<BTreeMap<Channel, u8>>;

/// Parse a trajectory document: a JSON array of timesteps, each an array
/// of `{channel: percentage}` objects indexed by client id.
pub fn parse_trajectory(json: &str, expected_clients: usize) -> Result<Sequence> {
    let timesteps: Vec<RawTimestep> =
        serde_json::from_str(json).map_err(|e| SolarError::Trajectory(e.to_string()))?;

    let mut frames = Vec::with_capacity(timesteps.len());
    for (step, clients) in timesteps.into_iter().enumerate() {
        if clients.len() < expected_clients {
            return Err(SolarError::Trajectory(format!(
                "timestep {step} covers {} clients, expected {expected_clients}",
                clients.len()
            )));
        }
        let mut entries = BTreeMap::new();
        for (client, levels) in clients.into_iter().enumerate() {
            let id = ClientId::try_from(client)
                .map_err(|_| SolarError::Trajectory(format!("timestep {step} has too many clients")))?;
            if let Some((channel, percent)) = levels.iter().find(|(_, p)| **p > MAX_PERCENT) {
                return Err(SolarError::Trajectory(format!(
                    "timestep {step} client {id}: {channel} at {percent}%"
                )));
            }
            entries.insert(id, levels);
        }
        frames.push(SetpointFrame::new(entries));
    }
    Sequence::new(frames)
}

/// Read a trajectory file once at startup.
pub fn load_trajectory(path: &Path, expected_clients: usize) -> Result<Sequence> {
    let json = std::fs::read_to_string(path)?;
    let sequence = parse_trajectory(&json, expected_clients)?;
    tracing::info!(path = %path.display(), frames = sequence.len(), "trajectory loaded");
    Ok(sequence)
}
