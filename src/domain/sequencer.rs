//! Capture Sequencer
//!
//! Top-level state machine for one full revolution:
//!
//! ```text
//!  Idle ──start──▶ AwaitingFirstSettle ──first burst done──▶ Shooting ◀─┐
//!   ▲                                                         │        │
//!   │                                     angle == target &&  │        │ burst done,
//!   │                                     settled             ▼        │ rotate
//!   │                                                    AwaitingStep ─┘
//!   │
//!   └── Complete (back at 0° after the last step) / Aborted (disconnect,
//!       capture failure) / stop
//! ```
//!
//! Every input arrives through one serialized queue, so transitions never
//! race. Events that belong to an earlier run (stale timers, late shot
//! results) are recognised by their epoch and dropped.

use crate::domain::bracket::{offered_modes, BracketMode, BracketPlan};
use crate::domain::models::{
    AbortReason, BurstId, CameraEvent, Lens, MessageSeverity, RunOutcome, RunPhase,
    StatusMessage, TimerHandle, TimerKind, TurntableEvent,
};
use crate::domain::ports::{
    Camera, CameraError, CameraSelection, CaptureRequest, Feedback, MotionSensor, Scheduler,
    Turntable,
};
use crate::domain::settings::{Settings, StabilitySettings};
use crate::domain::stability::StabilityGate;
use crate::infrastructure::turntable::protocol::FULL_TURN_DEGREES;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Step index used for bench-test shots taken without a turntable
pub const TEST_SHOT_STEP: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("a capture run is in progress")]
    RunActive,
    #[error("bracket mode {0} is not supported by this camera")]
    UnsupportedBracketMode(u8),
    #[error(transparent)]
    Camera(#[from] CameraError),
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub use_gyro: bool,
    pub bracket_mode: BracketMode,
    pub lens: Lens,
    pub focus_distance: f32,
    pub first_shot_delay: Duration,
    pub stability: StabilitySettings,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SequencerConfig {
    fn from(settings: &Settings) -> Self {
        let bracket_mode = BracketMode::new(settings.exposure_bracket_mode).unwrap_or_else(|e| {
            warn!("{}; falling back to no bracketing", e);
            BracketMode::NONE
        });
        Self {
            use_gyro: settings.use_gyro_stability_gate,
            bracket_mode,
            lens: settings.lens,
            focus_distance: settings.focus_distance,
            first_shot_delay: settings.first_shot_delay(),
            stability: settings.stability.clone(),
        }
    }
}

pub struct Collaborators {
    pub camera: Box<dyn Camera>,
    pub motion: Box<dyn MotionSensor>,
    pub feedback: Box<dyn Feedback>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Angle bookkeeping for one revolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPlan {
    step_degrees: u16,
    target_angle_sum: u16,
    total_degrees_traversed: u16,
}

impl RotationPlan {
    pub fn new(step_degrees: u16) -> Self {
        Self {
            step_degrees,
            target_angle_sum: step_degrees,
            total_degrees_traversed: 0,
        }
    }

    pub fn step_degrees(&self) -> u16 {
        self.step_degrees
    }

    pub fn target_angle_sum(&self) -> u16 {
        self.target_angle_sum
    }

    pub fn total_degrees_traversed(&self) -> u16 {
        self.total_degrees_traversed
    }

    pub fn is_at_target(&self, angle: u16) -> bool {
        angle == self.target_angle_sum
    }

    pub fn is_revolution_complete(&self, angle: u16) -> bool {
        self.target_angle_sum >= FULL_TURN_DEGREES && angle == 0
    }

    /// Move the target one step on; never past a full turn plus one step
    pub fn advance(&mut self) {
        let limit = FULL_TURN_DEGREES + self.step_degrees;
        self.target_angle_sum = (self.target_angle_sum + self.step_degrees).min(limit);
    }

    pub fn record_rotation(&mut self) {
        self.total_degrees_traversed += self.step_degrees;
    }
}

#[derive(Debug)]
struct InFlightBurst {
    id: BurstId,
    bracket: BracketPlan,
}

#[derive(Debug)]
struct CaptureRun {
    epoch: u64,
    rotation: RotationPlan,
    burst: Option<InFlightBurst>,
    shot_index: u32,
    first_shot_timer: Option<TimerHandle>,
}

pub struct CaptureSequencer {
    config: SequencerConfig,
    collaborators: Collaborators,
    gate: StabilityGate,
    phase: RunPhase,
    run: Option<CaptureRun>,
    epoch: u64,
    offered_modes: Vec<BracketMode>,
    last_outcome: Option<RunOutcome>,
}

impl CaptureSequencer {
    pub fn new(config: SequencerConfig, collaborators: Collaborators) -> Self {
        let gate = StabilityGate::new(&config.stability, config.use_gyro);
        let offered_modes = offered_modes(collaborators.camera.ae_compensation_range().as_ref());
        Self {
            config,
            collaborators,
            gate,
            phase: RunPhase::Idle,
            run: None,
            epoch: 0,
            offered_modes,
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn rotation_plan(&self) -> Option<RotationPlan> {
        self.run.as_ref().map(|run| run.rotation)
    }

    pub fn shot_index(&self) -> Option<u32> {
        self.run.as_ref().map(|run| run.shot_index)
    }

    pub fn has_burst_in_flight(&self) -> bool {
        self.run.as_ref().is_some_and(|run| run.burst.is_some())
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn gate(&self) -> &StabilityGate {
        &self.gate
    }

    pub fn offered_bracket_modes(&self) -> &[BracketMode] {
        &self.offered_modes
    }

    pub fn report(&mut self, message: StatusMessage) {
        self.collaborators.feedback.status(message);
    }

    /// Open the camera for the configured lens and recompute which bracket
    /// modes it can shoot.
    pub fn configure_camera(&mut self) -> Result<(), SequencerError> {
        let selection = CameraSelection::for_lens(self.config.lens);
        self.collaborators.camera.configure(&selection)?;
        self.refresh_offered_modes();
        Ok(())
    }

    pub fn set_lens(&mut self, lens: Lens) -> Result<(), SequencerError> {
        if self.is_running() {
            return Err(SequencerError::RunActive);
        }
        self.config.lens = lens;
        self.configure_camera()?;
        info!(
            "Lens set to {} ({}° steps)",
            lens.label(),
            lens.step_degrees()
        );
        Ok(())
    }

    pub fn set_bracket_mode(&mut self, mode: u8) -> Result<BracketMode, SequencerError> {
        let mode = BracketMode::new(mode)
            .ok()
            .filter(|m| self.offered_modes.contains(m))
            .ok_or(SequencerError::UnsupportedBracketMode(mode))?;
        self.config.bracket_mode = mode;
        info!("Exposure bracket mode: {}", mode.label());
        Ok(mode)
    }

    pub fn set_use_gyro(&mut self, enabled: bool) {
        self.config.use_gyro = enabled;
        self.gate.set_enabled(enabled);
        info!("Gyro stability gate {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Begin a revolution, or take a single test shot when the turntable is
    /// not connected.
    pub fn start_capture(&mut self, turntable: &mut dyn Turntable) {
        if self.is_running() {
            warn!("Capture already running, ignoring start");
            return;
        }

        if !turntable.is_ready() {
            self.take_test_shot();
            return;
        }

        self.epoch += 1;
        let rotation = RotationPlan::new(self.config.lens.step_degrees());
        info!(
            "Starting capture run {} ({}° steps, bracket {})",
            self.epoch,
            rotation.step_degrees(),
            self.config.bracket_mode.label()
        );

        self.collaborators.feedback.play_start_cue();
        self.gate.reset();
        self.collaborators.motion.start(self.gate.energy_cell());

        let timer = self.collaborators.scheduler.schedule_once(
            self.config.first_shot_delay,
            TimerKind::FirstShot { run: self.epoch },
        );
        self.run = Some(CaptureRun {
            epoch: self.epoch,
            rotation,
            burst: None,
            shot_index: 0,
            first_shot_timer: Some(timer),
        });
        self.set_phase(RunPhase::AwaitingFirstSettle);
    }

    /// Operator stop: no further captures or rotations. A burst already in
    /// flight finishes on the camera but its results are ignored.
    pub fn stop_capture(&mut self) {
        if !self.is_running() {
            return;
        }
        info!("Capture stopped by operator");
        self.finish(RunOutcome::Stopped);
    }

    pub fn on_timer(&mut self, timer: TimerKind) {
        let TimerKind::FirstShot { run } = timer else {
            return;
        };
        let Some(current) = self.run.as_mut() else {
            debug!("First-shot timer for run {} fired while idle", run);
            return;
        };
        if current.epoch != run || self.phase != RunPhase::AwaitingFirstSettle {
            debug!("Ignoring stale first-shot timer for run {}", run);
            return;
        }
        current.first_shot_timer = None;
        if current.burst.is_some() {
            return;
        }
        // Nothing has moved yet, so the first burst does not wait on the gate
        self.fire_burst();
    }

    pub fn on_turntable_event(&mut self, event: TurntableEvent, turntable: &mut dyn Turntable) {
        match event {
            TurntableEvent::Connected => {
                self.report(StatusMessage::new("Turntable connected", MessageSeverity::Success));
            }
            TurntableEvent::ConnectionFailed(reason) => {
                self.report(StatusMessage::new(
                    format!("Connection failed: {}", reason),
                    MessageSeverity::Error,
                ));
                if self.is_running() {
                    self.abort(AbortReason::Disconnected);
                }
            }
            TurntableEvent::Disconnected => {
                self.report(StatusMessage::new(
                    "Turntable disconnected",
                    MessageSeverity::Warning,
                ));
                if self.is_running() {
                    self.abort(AbortReason::Disconnected);
                }
            }
            TurntableEvent::AngleChanged(angle) => self.on_angle_changed(angle, turntable),
        }
    }

    pub fn on_camera_event(&mut self, event: CameraEvent, turntable: &mut dyn Turntable) {
        let (burst, shot) = match &event {
            CameraEvent::ShotSucceeded { burst, shot } => (*burst, *shot),
            CameraEvent::ShotFailed { burst, shot, .. } => (*burst, *shot),
        };

        let in_flight = self
            .run
            .as_mut()
            .and_then(|run| run.burst.as_mut())
            .filter(|b| b.id == burst);
        let Some(in_flight) = in_flight else {
            if burst.step == TEST_SHOT_STEP {
                info!("Test shot {} result: {:?}", shot, event);
            } else {
                debug!("Ignoring result for stale burst {:?}", burst);
            }
            return;
        };

        match event {
            CameraEvent::ShotSucceeded { .. } => {
                if !in_flight.bracket.record_success(shot) {
                    warn!("Unexpected shot {} report for burst {:?}", shot, burst);
                    return;
                }
                debug!(
                    "Shot {}/{} of burst {:?} captured",
                    in_flight.bracket.captured_count(),
                    in_flight.bracket.shot_count(),
                    burst
                );
                if in_flight.bracket.is_complete() {
                    self.complete_step(turntable);
                }
            }
            CameraEvent::ShotFailed { reason, .. } => {
                error!("Shot {} of burst {:?} failed: {}", shot, burst, reason);
                self.abort(AbortReason::CaptureFailed(reason));
            }
        }
    }

    fn on_angle_changed(&mut self, angle: u16, turntable: &mut dyn Turntable) {
        if self.phase != RunPhase::Shooting {
            return;
        }
        let Some(run) = self.run.as_ref() else {
            return;
        };
        if run.burst.is_some() {
            return;
        }

        if run.rotation.is_revolution_complete(angle) {
            let bursts = run.shot_index;
            info!("Revolution complete after {} bursts", bursts);
            self.finish(RunOutcome::Completed { bursts });
            return;
        }

        if !run.rotation.is_at_target(angle) {
            return;
        }

        let now = self.collaborators.scheduler.now();
        if !self.gate.is_settled(now) {
            debug!(
                "At {}° but still moving (energy {:.4})",
                angle,
                self.gate.energy()
            );
            return;
        }

        debug!("Settled at {}° (table reports {}°)", angle, turntable.current_angle());
        self.set_phase(RunPhase::AwaitingStep);
        self.fire_burst();
    }

    fn fire_burst(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.burst.is_some() {
            warn!("Burst already in flight, not triggering another");
            return;
        }

        let bracket = BracketPlan::new(self.config.bracket_mode);
        let id = BurstId {
            run: run.epoch,
            step: run.shot_index,
        };
        let request = CaptureRequest {
            burst: id,
            file_index: run.shot_index,
            focus_distance: self.config.focus_distance,
            shots: bracket.shots(run.shot_index),
        };
        info!(
            "Capturing step {} ({} shots, EV {:?})",
            run.shot_index,
            bracket.shot_count(),
            bracket.ev_offsets()
        );
        run.burst = Some(InFlightBurst { id, bracket });

        if let Err(e) = self.collaborators.camera.capture_burst(request) {
            error!("Camera rejected burst: {}", e);
            self.abort(AbortReason::CaptureFailed(e.to_string()));
        }
    }

    fn complete_step(&mut self, turntable: &mut dyn Turntable) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.burst = None;
        run.shot_index += 1;

        if self.phase == RunPhase::AwaitingStep {
            run.rotation.advance();
        }
        let rotation = run.rotation;
        let bursts = run.shot_index;
        self.set_phase(RunPhase::Shooting);

        if rotation.is_revolution_complete(turntable.current_angle()) {
            self.finish(RunOutcome::Completed { bursts });
            return;
        }
        self.rotate(turntable);
    }

    fn rotate(&mut self, turntable: &mut dyn Turntable) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let step = run.rotation.step_degrees();
        match turntable.send_rotate_command(step as u8) {
            Ok(()) => {
                run.rotation.record_rotation();
                debug!(
                    "Rotating {}° towards {}°",
                    step,
                    run.rotation.target_angle_sum()
                );
                let now = self.collaborators.scheduler.now();
                self.gate.note_command(now);
            }
            Err(e) => {
                error!("Rotate command failed: {}", e);
                self.abort(AbortReason::RotateFailed(e.to_string()));
            }
        }
    }

    fn take_test_shot(&mut self) {
        info!("Turntable not connected, taking a test shot");
        let bracket = BracketPlan::new(self.config.bracket_mode);
        let request = CaptureRequest {
            burst: BurstId {
                run: self.epoch,
                step: TEST_SHOT_STEP,
            },
            file_index: 0,
            focus_distance: self.config.focus_distance,
            shots: bracket.shots(0),
        };
        self.report(StatusMessage::new("Test shooting", MessageSeverity::Info));
        if let Err(e) = self.collaborators.camera.capture_burst(request) {
            warn!("Test shot failed: {}", e);
            self.report(StatusMessage::new(
                format!("Test shot failed: {}", e),
                MessageSeverity::Error,
            ));
        }
    }

    fn abort(&mut self, reason: AbortReason) {
        warn!("Aborting capture run: {}", reason);
        self.report(StatusMessage::new(
            format!("Capture aborted: {}", reason),
            MessageSeverity::Error,
        ));
        self.finish(RunOutcome::Aborted(reason));
    }

    fn finish(&mut self, outcome: RunOutcome) {
        let Some(run) = self.run.take() else {
            return;
        };
        if let Some(timer) = run.first_shot_timer {
            self.collaborators.scheduler.cancel(timer);
        }
        self.collaborators.motion.stop();
        // Invalidate anything still addressed to this run
        self.epoch += 1;

        match &outcome {
            RunOutcome::Completed { bursts } => {
                self.set_phase(RunPhase::Complete);
                self.collaborators.feedback.play_complete_cue();
                self.report(StatusMessage::new(
                    format!("Capture complete ({} positions)", bursts),
                    MessageSeverity::Success,
                ));
            }
            RunOutcome::Aborted(_) => self.set_phase(RunPhase::Aborted),
            RunOutcome::Stopped => {
                self.report(StatusMessage::new("Capture stopped", MessageSeverity::Info));
            }
        }

        self.last_outcome = Some(outcome);
        self.set_phase(RunPhase::Idle);
    }

    fn refresh_offered_modes(&mut self) {
        let range = self.collaborators.camera.ae_compensation_range();
        self.offered_modes = offered_modes(range.as_ref());
        if !self.offered_modes.contains(&self.config.bracket_mode) {
            warn!(
                "Bracket mode {} not supported by this camera, using none",
                self.config.bracket_mode.label()
            );
            self.config.bracket_mode = BracketMode::NONE;
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            debug!("Phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}
