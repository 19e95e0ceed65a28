// Setpoint frames and the sequences the hub steps through
use super::channel::{Channel, Levels, MAX_PERCENT};
use crate::error::{Result, SolarError};
use std::collections::BTreeMap;
use std::f64::consts::TAU;

pub type ClientId = u8;

/// Levels for every client at one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetpointFrame {
    entries: BTreeMap<ClientId, Levels>,
}

impl SetpointFrame {
    pub fn new(entries: BTreeMap<ClientId, Levels>) -> Self {
        Self { entries }
    }

    pub fn entry(&self, client_id: ClientId) -> Option<&Levels> {
        self.entries.get(&client_id)
    }

    pub fn covers(&self, client_count: usize) -> bool {
        (0..client_count).all(|id| u8::try_from(id).is_ok_and(|id| self.entries.contains_key(&id)))
    }
}

/// Ordered frames, replayed in a loop.
#[derive(Debug, Clone)]
pub struct Sequence {
    frames: Vec<SetpointFrame>,
}

impl Sequence {
    pub fn new(frames: Vec<SetpointFrame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(SolarError::Trajectory("sequence has no frames".to_string()));
        }
        Ok(Self { frames })
    }

    /// Panels arranged around a rotating body: each client sees a half-sine
    /// of light per revolution, phase-shifted by its position.
    pub fn rotation(client_count: usize, steps: usize, peak: f64, channels: &[Channel]) -> Result<Self> {
        if client_count == 0 || steps == 0 {
            return Err(SolarError::Config(
                "rotation needs at least one client and one step".to_string(),
            ));
        }
        let peak = peak.clamp(0.0, 1.0);
        let frames = (0..steps)
            .map(|step| {
                let angle = TAU * step as f64 / steps as f64;
                let entries = (0..client_count)
                    .filter_map(|client| {
                        let id = ClientId::try_from(client).ok()?;
                        let phase = TAU * client as f64 / client_count as f64;
                        let exposure = (angle - phase).sin().max(0.0);
                        let percent = (exposure * peak * f64::from(MAX_PERCENT)).round() as u8;
                        let levels = channels.iter().map(|c| (*c, percent)).collect();
                        Some((id, levels))
                    })
                    .collect();
                SetpointFrame::new(entries)
            })
            .collect();
        Self::new(frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `index`, wrapping at the end.
    pub fn frame(&self, index: usize) -> &SetpointFrame {
        &self.frames[index % self.frames.len()]
    }

    pub fn covers(&self, client_count: usize) -> bool {
        self.frames.iter().all(|f| f.covers(client_count))
    }
}
