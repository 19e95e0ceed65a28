// Panel agent - applies hub commands through calibration and thermal gating
use crate::application::guardian::{GuardianDecision, ThermalGuardian};
use crate::application::hardware::{Actuator, SensorBank};
use crate::domain::calibration::{CalibrationProfile, CalibrationSet};
use crate::domain::channel::{ActuatorFrame, Channel, Levels, MAX_PERCENT, RawLevels};
use crate::domain::message::{GuardianState, HubMessage, PanelMessage, TelemetryReport};
use crate::domain::setpoint::ClientId;
use crate::domain::state::OperationalState;
use crate::domain::thermal::{ThermalProbe, ThermalReadings, ThermistorModel};
use crate::error::SolarError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

/// Static identity and calibration of one panel.
#[derive(Debug, Clone)]
pub struct PanelSettings {
    pub client_id: ClientId,
    pub profile: CalibrationProfile,
    pub safe_limiter: f64,
    pub thermistor: ThermistorModel,
}

/// Everything the executor and the guardian both touch.
struct PanelControl {
    state: OperationalState,
    tables: CalibrationSet,
    commanded: Levels,
    guardian: ThermalGuardian,
    last_frame: ActuatorFrame,
}

/// Point-in-time view of a panel, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSnapshot {
    pub state: OperationalState,
    pub guardian: GuardianState,
    pub commanded: Levels,
    pub last_frame: ActuatorFrame,
}

pub struct PanelAgent {
    settings: PanelSettings,
    control: Mutex<PanelControl>,
    actuator: Arc<dyn Actuator>,
    sensors: Arc<dyn SensorBank>,
    outbound: mpsc::Sender<PanelMessage>,
}

impl PanelAgent {
    pub fn new(
        settings: PanelSettings,
        guardian: ThermalGuardian,
        actuator: Arc<dyn Actuator>,
        sensors: Arc<dyn SensorBank>,
        outbound: mpsc::Sender<PanelMessage>,
    ) -> Self {
        let state = OperationalState::default();
        let tables = CalibrationSet::build(&settings.profile, state, settings.safe_limiter);
        let last_frame = tables.dark_frame();
        Self {
            settings,
            control: Mutex::new(PanelControl {
                state,
                tables,
                commanded: Levels::new(),
                guardian,
                last_frame,
            }),
            actuator,
            sensors,
            outbound,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.settings.client_id
    }

    pub fn register_message(&self) -> PanelMessage {
        PanelMessage::Register {
            client_id: self.settings.client_id,
        }
    }

    pub async fn snapshot(&self) -> PanelSnapshot {
        let ctl = self.control.lock().await;
        PanelSnapshot {
            state: ctl.state,
            guardian: ctl.guardian.state(),
            commanded: ctl.commanded.clone(),
            last_frame: ctl.last_frame.clone(),
        }
    }

    /// Mirror the hub's state: rebuild the tables and, unless tripped,
    /// push the commanded levels through them straight away.
    pub async fn on_state_change(&self, next: OperationalState) {
        let mut ctl = self.control.lock().await;
        if ctl.state == next {
            tracing::debug!(state = %next, "state unchanged");
            return;
        }
        tracing::info!(from = %ctl.state, to = %next, "panel state changed");
        ctl.state = next;
        ctl.tables = CalibrationSet::build(&self.settings.profile, next, self.settings.safe_limiter);
        if !ctl.guardian.is_tripped() {
            let frame = ctl.tables.resolve(&ctl.commanded);
            self.write(&mut ctl, frame).await;
        }
    }

    /// Validate and apply one setpoint. Out-of-range channels are rejected
    /// and keep their previous level. While tripped the levels are stored
    /// but the outputs stay dark.
    pub async fn on_setpoint(&self, raw: &RawLevels) {
        let accepted = validate_levels(raw);
        {
            let mut ctl = self.control.lock().await;
            ctl.commanded.extend(accepted);
            if ctl.guardian.is_tripped() {
                tracing::debug!(commanded = ?ctl.commanded, "setpoint stored while tripped");
                return;
            }
            let frame = ctl.tables.resolve(&ctl.commanded);
            tracing::debug!(commanded = ?ctl.commanded, ?frame, "applying setpoint");
            self.write(&mut ctl, frame).await;
        }
        self.report_telemetry().await;
    }

    /// One guardian poll: sample every probe and act on the transition.
    pub async fn poll_thermals(&self) -> GuardianDecision {
        let readings = self.read_thermals().await;
        tracing::debug!(?readings, "thermal poll");

        let decision = {
            let mut ctl = self.control.lock().await;
            let commanded = ctl.commanded.clone();
            let decision = ctl.guardian.evaluate(&readings, &commanded);
            match &decision {
                GuardianDecision::Hold => {
                    // a failed dark write is retried on every poll until it lands
                    if ctl.guardian.is_tripped() || ctl.state == OperationalState::Halt {
                        let dark = ctl.tables.dark_frame();
                        if ctl.last_frame != dark {
                            tracing::warn!(state = %ctl.state, "outputs still lit while forced dark, retrying");
                            self.write(&mut ctl, dark).await;
                        }
                    }
                }
                GuardianDecision::Trip(cause) => {
                    tracing::warn!(%cause, pre_trip = ?commanded, "thermal trip, outputs forced dark");
                    let frame = ctl.tables.dark_frame();
                    self.write(&mut ctl, frame).await;
                }
                GuardianDecision::Resume(levels) => {
                    tracing::info!(restored = ?levels, "temperatures back below resume, outputs restored");
                    ctl.commanded = levels.clone();
                    let frame = ctl.tables.resolve(levels);
                    self.write(&mut ctl, frame).await;
                }
            }
            decision
        };

        if decision != GuardianDecision::Hold {
            self.report_telemetry().await;
        }
        decision
    }

    pub async fn read_thermals(&self) -> ThermalReadings {
        let mut readings = ThermalReadings::new();
        for probe in ThermalProbe::ALL {
            let celsius = match self.sensors.thermistor_voltage(probe).await {
                Ok(voltage) => {
                    let celsius = self.settings.thermistor.celsius(voltage);
                    if celsius.is_none() {
                        let fault = SolarError::SensorFault {
                            probe: probe.to_string(),
                            reason: format!("voltage {voltage:.3}V out of range"),
                        };
                        tracing::warn!("{}", fault);
                    }
                    celsius
                }
                Err(e) => {
                    tracing::warn!(%probe, error = %e, "thermistor read failed");
                    None
                }
            };
            readings.insert(probe, celsius);
        }
        readings
    }

    /// Queue a telemetry report for the hub. Dropped if the link is backed up.
    pub async fn report_telemetry(&self) {
        let thermal = self.read_thermals().await;
        let photodiode = match self.sensors.photodiode().await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "photodiode read failed");
                None
            }
        };
        let guardian = self.control.lock().await.guardian.state();
        let report = TelemetryReport {
            client_id: self.settings.client_id,
            thermal,
            photodiode,
            guardian,
        };
        if let Err(e) = self.outbound.try_send(PanelMessage::Telemetry(report)) {
            tracing::debug!(error = %e, "telemetry dropped");
        }
    }

    async fn write(&self, ctl: &mut PanelControl, frame: ActuatorFrame) {
        match self.actuator.apply(&frame).await {
            Ok(()) => ctl.last_frame = frame,
            Err(e) => tracing::warn!(error = %e, "actuator write failed"),
        }
    }

    /// Start the command executor. State changes are drained before any
    /// pending setpoint, so a halt is never queued behind light commands.
    pub fn spawn_executor(self: &Arc<Self>) -> PanelInbox {
        let (control_tx, mut control_rx) = mpsc::channel::<OperationalState>(8);
        let (setpoint_tx, mut setpoint_rx) = watch::channel::<Option<RawLevels>>(None);
        let agent = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(state) = control_rx.recv() => agent.on_state_change(state).await,
                    changed = setpoint_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let levels = setpoint_rx.borrow_and_update().clone();
                        if let Some(levels) = levels {
                            agent.on_setpoint(&levels).await;
                        }
                    }
                }
            }
            tracing::debug!("command executor stopped");
        });

        PanelInbox {
            control: control_tx,
            setpoints: setpoint_tx,
        }
    }

    pub async fn run_telemetry_loop(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);
        while ticks.next().await.is_some() {
            self.report_telemetry().await;
        }
    }
}

fn validate_levels(raw: &RawLevels) -> Levels {
    raw.iter()
        .filter_map(|(channel, value)| match u8::try_from(*value) {
            Ok(percent) if percent <= MAX_PERCENT => Some((*channel, percent)),
            _ => {
                reject(*channel, *value);
                None
            }
        })
        .collect()
}

fn reject(channel: Channel, value: i64) {
    let err = SolarError::CommandOutOfRange {
        channel: channel.to_string(),
        value,
    };
    tracing::warn!("{}", err);
}

/// Receive-side entry point into the executor.
#[derive(Clone)]
pub struct PanelInbox {
    control: mpsc::Sender<OperationalState>,
    setpoints: watch::Sender<Option<RawLevels>>,
}

impl PanelInbox {
    /// Route one hub message. Setpoints replace any that are still pending.
    pub async fn deliver(&self, msg: HubMessage) {
        match msg {
            HubMessage::RegistrationAck { client_id } => {
                tracing::info!(client_id, "registered with hub");
            }
            HubMessage::StateChange { state } => {
                if self.control.send(state).await.is_err() {
                    tracing::warn!(%state, "executor gone, state change lost");
                }
            }
            HubMessage::Setpoint { levels } => {
                self.setpoints.send_replace(Some(levels));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calibration::default_profile;
    use crate::domain::thermal::{SafetyThresholds, SensorFaultPolicy};
    use crate::infrastructure::simulated::SimulatedPanel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        agent: Arc<PanelAgent>,
        hardware: Arc<SimulatedPanel>,
        outbound: mpsc::Receiver<PanelMessage>,
    }

    fn fixture() -> Fixture {
        let settings = PanelSettings {
            client_id: 1,
            profile: default_profile(),
            safe_limiter: 0.5,
            thermistor: ThermistorModel::default(),
        };
        let hardware = Arc::new(SimulatedPanel::pinned(
            ThermistorModel::default(),
            [(ThermalProbe::Led, 50.0), (ThermalProbe::Heatsink, 30.0), (ThermalProbe::Cell, 40.0)],
        ));
        let guardian = ThermalGuardian::new(SafetyThresholds::default(), SensorFaultPolicy::FailClosed).unwrap();
        let (tx, rx) = mpsc::channel(32);
        let agent = Arc::new(PanelAgent::new(settings, guardian, hardware.clone(), hardware.clone(), tx));
        Fixture {
            agent,
            hardware,
            outbound: rx,
        }
    }

    fn raw(pairs: &[(Channel, i64)]) -> RawLevels {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_setpoint_resolves_through_tables() {
        let f = fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Red, 50), (Channel::Green, 0)])).await;

        let frame = f.hardware.last_frame().unwrap();
        assert_eq!(frame[&Channel::Red], 38145);
        // 0 % is the calibrated start value, not off
        assert_eq!(frame[&Channel::Green], 10140);
        assert_eq!(frame[&Channel::Halogen], 0);
    }

    #[tokio::test]
    async fn test_out_of_range_channel_rejected_others_applied() {
        let f = fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Red, 100)])).await;
        f.agent
            .on_setpoint(&raw(&[(Channel::Red, 140), (Channel::Blue, 100), (Channel::Uv, -1)]))
            .await;

        let snapshot = f.agent.snapshot().await;
        assert_eq!(snapshot.commanded[&Channel::Red], 100);
        assert_eq!(snapshot.commanded[&Channel::Blue], 100);
        assert!(!snapshot.commanded.contains_key(&Channel::Uv));
        assert_eq!(snapshot.last_frame[&Channel::Red], 65535);
    }

    #[tokio::test]
    async fn test_setpoint_reports_telemetry() {
        let mut f = fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Red, 10)])).await;
        let Ok(PanelMessage::Telemetry(report)) = f.outbound.try_recv() else {
            panic!("expected telemetry");
        };
        assert_eq!(report.client_id, 1);
        assert_eq!(report.guardian, GuardianState::Armed);
        let led = report.thermal[&ThermalProbe::Led].unwrap();
        assert!((led - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_halt_zeroes_outputs_immediately() {
        let f = fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Red, 70), (Channel::Halogen, 70)])).await;
        f.agent.on_state_change(OperationalState::Halt).await;

        let frame = f.hardware.last_frame().unwrap();
        assert!(frame.values().all(|v| *v == 0));

        // setpoints under halt stay dark
        f.agent.on_setpoint(&raw(&[(Channel::Red, 100)])).await;
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));
    }

    #[tokio::test]
    async fn test_safe_mode_limits_range_and_disables_uv() {
        let f = fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Red, 100), (Channel::Uv, 100)])).await;
        f.agent.on_state_change(OperationalState::Safe).await;

        let frame = f.hardware.last_frame().unwrap();
        assert_eq!(frame[&Channel::Red], 32768);
        assert_eq!(frame[&Channel::Uv], 0);

        f.agent.on_state_change(OperationalState::Normal).await;
        assert_eq!(f.hardware.last_frame().unwrap()[&Channel::Uv], 65535);
    }

    #[tokio::test]
    async fn test_thermal_trip_and_restore_scenario() {
        let f = fixture();
        let command = raw(&[(Channel::Red, 80), (Channel::Halogen, 40)]);
        f.agent.on_setpoint(&command).await;
        let applied = f.hardware.last_frame().unwrap();

        assert_eq!(f.agent.poll_thermals().await, GuardianDecision::Hold);
        assert_eq!(f.hardware.last_frame().unwrap(), applied);

        f.hardware.set_temperature(ThermalProbe::Led, Some(105.0));
        assert!(matches!(f.agent.poll_thermals().await, GuardianDecision::Trip(_)));
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));

        // commands while tripped are stored, not applied
        f.agent.on_setpoint(&raw(&[(Channel::Red, 20)])).await;
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));
        assert_eq!(f.agent.snapshot().await.guardian, GuardianState::Tripped);

        // inside the hysteresis band nothing changes
        f.hardware.set_temperature(ThermalProbe::Led, Some(60.0));
        assert_eq!(f.agent.poll_thermals().await, GuardianDecision::Hold);
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));

        f.hardware.set_temperature(ThermalProbe::Led, Some(44.0));
        f.hardware.set_temperature(ThermalProbe::Heatsink, Some(20.0));
        f.hardware.set_temperature(ThermalProbe::Cell, Some(20.0));
        let expected = Levels::from([(Channel::Red, 80), (Channel::Halogen, 40)]);
        assert_eq!(f.agent.poll_thermals().await, GuardianDecision::Resume(expected));
        assert_eq!(f.hardware.last_frame().unwrap(), applied);
    }

    #[tokio::test]
    async fn test_unreadable_probe_trips_fail_closed() {
        let f = fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Blue, 60)])).await;
        f.hardware.set_temperature(ThermalProbe::Cell, None);
        assert!(matches!(f.agent.poll_thermals().await, GuardianDecision::Trip(_)));
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));
    }

    /// Actuator that fails a set number of writes before reaching the hardware.
    struct FlakyActuator {
        inner: Arc<SimulatedPanel>,
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Actuator for FlakyActuator {
        async fn apply(&self, frame: &ActuatorFrame) -> crate::error::Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SolarError::Hardware("bus timeout".to_string()));
            }
            self.inner.apply(frame).await
        }
    }

    fn flaky_fixture() -> (Fixture, Arc<FlakyActuator>) {
        let f = fixture();
        let actuator = Arc::new(FlakyActuator {
            inner: f.hardware.clone(),
            failures: AtomicUsize::new(0),
        });
        let settings = f.agent.settings.clone();
        let guardian = ThermalGuardian::new(SafetyThresholds::default(), SensorFaultPolicy::FailClosed).unwrap();
        let (tx, rx) = mpsc::channel(32);
        let agent = Arc::new(PanelAgent::new(settings, guardian, actuator.clone(), f.hardware.clone(), tx));
        (
            Fixture {
                agent,
                hardware: f.hardware,
                outbound: rx,
            },
            actuator,
        )
    }

    #[tokio::test]
    async fn test_failed_dark_write_retried_while_tripped() {
        let (f, actuator) = flaky_fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Red, 100)])).await;
        assert_eq!(f.hardware.last_frame().unwrap()[&Channel::Red], 65535);

        actuator.failures.store(1, Ordering::SeqCst);
        f.hardware.set_temperature(ThermalProbe::Led, Some(120.0));
        assert!(matches!(f.agent.poll_thermals().await, GuardianDecision::Trip(_)));
        // the zeroing write was lost
        assert_eq!(f.hardware.last_frame().unwrap()[&Channel::Red], 65535);

        assert_eq!(f.agent.poll_thermals().await, GuardianDecision::Hold);
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));
        assert_eq!(f.agent.snapshot().await.guardian, GuardianState::Tripped);

        // once dark, further polls leave the hardware alone
        let writes = f.hardware.write_count();
        assert_eq!(f.agent.poll_thermals().await, GuardianDecision::Hold);
        assert_eq!(f.hardware.write_count(), writes);
    }

    #[tokio::test]
    async fn test_failed_halt_write_retried_by_guardian_poll() {
        let (f, actuator) = flaky_fixture();
        f.agent.on_setpoint(&raw(&[(Channel::Halogen, 80)])).await;

        actuator.failures.store(1, Ordering::SeqCst);
        f.agent.on_state_change(OperationalState::Halt).await;
        assert!(f.hardware.last_frame().unwrap()[&Channel::Halogen] > 0);

        assert_eq!(f.agent.poll_thermals().await, GuardianDecision::Hold);
        assert!(f.hardware.last_frame().unwrap().values().all(|v| *v == 0));
    }

    #[tokio::test]
    async fn test_executor_prefers_state_changes() {
        let f = fixture();
        let inbox = f.agent.spawn_executor();
        inbox
            .deliver(HubMessage::Setpoint {
                levels: raw(&[(Channel::Red, 100)]),
            })
            .await;
        inbox
            .deliver(HubMessage::StateChange {
                state: OperationalState::Halt,
            })
            .await;

        for _ in 0..50 {
            let snapshot = f.agent.snapshot().await;
            if snapshot.state == OperationalState::Halt && snapshot.commanded.contains_key(&Channel::Red) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = f.agent.snapshot().await;
        assert_eq!(snapshot.state, OperationalState::Halt);
        assert!(snapshot.last_frame.values().all(|v| *v == 0));
    }
}
