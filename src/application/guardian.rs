// Thermal guardian - hysteresis state machine that forces outputs dark
use crate::application::panel_agent::PanelAgent;
use crate::domain::channel::Levels;
use crate::domain::message::GuardianState;
use crate::domain::thermal::{SafetyThresholds, SensorFaultPolicy, ThermalProbe, ThermalReadings};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TripCause {
    OverLimit {
        probe: ThermalProbe,
        celsius: f64,
        threshold: f64,
    },
    SensorFault {
        probe: ThermalProbe,
    },
}

impl fmt::Display for TripCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripCause::OverLimit {
                probe,
                celsius,
                threshold,
            } => write!(f, "{probe} at {celsius:.1}C exceeds {threshold:.1}C"),
            TripCause::SensorFault { probe } => write!(f, "{probe} sensor unreadable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardianDecision {
    /// No transition.
    Hold,
    /// Outputs must go dark now.
    Trip(TripCause),
    /// Cooled down; re-apply these levels.
    Resume(Levels),
}

#[derive(Debug, Clone)]
pub struct ThermalGuardian {
    state: GuardianState,
    thresholds: SafetyThresholds,
    policy: SensorFaultPolicy,
    pre_trip: Option<Levels>,
}

impl ThermalGuardian {
    pub fn new(thresholds: SafetyThresholds, policy: SensorFaultPolicy) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            state: GuardianState::Armed,
            thresholds,
            policy,
            pre_trip: None,
        })
    }

    pub fn state(&self) -> GuardianState {
        self.state
    }

    pub fn is_tripped(&self) -> bool {
        self.state == GuardianState::Tripped
    }

    /// Levels captured at the moment of the last trip.
    pub fn pre_trip_setpoint(&self) -> Option<&Levels> {
        self.pre_trip.as_ref()
    }

    /// Feed one poll's readings. Probes missing from `readings` count as unreadable.
    pub fn evaluate(&mut self, readings: &ThermalReadings, commanded: &Levels) -> GuardianDecision {
        match self.state {
            GuardianState::Armed => match self.trip_cause(readings) {
                Some(cause) => {
                    self.state = GuardianState::Tripped;
                    self.pre_trip = Some(commanded.clone());
                    GuardianDecision::Trip(cause)
                }
                None => GuardianDecision::Hold,
            },
            GuardianState::Tripped => {
                if self.cooled(readings) {
                    self.state = GuardianState::Armed;
                    GuardianDecision::Resume(self.pre_trip.take().unwrap_or_default())
                } else {
                    GuardianDecision::Hold
                }
            }
        }
    }

    fn reading(readings: &ThermalReadings, probe: ThermalProbe) -> Option<f64> {
        readings.get(&probe).copied().flatten()
    }

    fn trip_cause(&self, readings: &ThermalReadings) -> Option<TripCause> {
        ThermalProbe::ALL.into_iter().find_map(|probe| {
            let threshold = self.thresholds.shutdown(probe);
            match Self::reading(readings, probe) {
                Some(celsius) if celsius > threshold => Some(TripCause::OverLimit {
                    probe,
                    celsius,
                    threshold,
                }),
                Some(_) => None,
                None => (self.policy == SensorFaultPolicy::FailClosed)
                    .then_some(TripCause::SensorFault { probe }),
            }
        })
    }

    /// Every probe at or below the resume temperature at the same time.
    fn cooled(&self, readings: &ThermalReadings) -> bool {
        ThermalProbe::ALL
            .into_iter()
            .all(|probe| match Self::reading(readings, probe) {
                Some(celsius) => celsius <= self.thresholds.resume,
                None => self.policy == SensorFaultPolicy::FailOpen,
            })
    }
}

/// Poll the panel's thermals forever, independent of command traffic.
pub async fn run_guardian(agent: Arc<PanelAgent>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = IntervalStream::new(interval);
    while polls.next().await.is_some() {
        agent.poll_thermals().await;
    }
}
