//! Narrow interfaces to the collaborators the capture sequencer drives.

use crate::domain::bracket::{AeCompensationRange, ShotDescriptor};
use crate::domain::models::{BurstId, Lens, StatusMessage, TimerHandle, TimerKind};
use crate::domain::stability::EnergyCell;
use std::sync::Arc;
use crate::infrastructure::turntable::client::TurntableError;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera not configured")]
    NotConfigured,
    #[error("a capture burst is already running")]
    Busy,
    #[error("camera error: {0}")]
    Device(String),
}

/// Which physical sensor the camera should open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSelection {
    pub lens: Lens,
    pub camera_id: Option<String>,
    pub physical_id: Option<String>,
    pub extension_mode: Option<u32>,
}

impl CameraSelection {
    pub fn for_lens(lens: Lens) -> Self {
        Self {
            lens,
            camera_id: None,
            physical_id: None,
            extension_mode: None,
        }
    }
}

/// One locked burst: exposure and focus are pinned for every shot
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub burst: BurstId,
    pub file_index: u32,
    pub focus_distance: f32,
    pub shots: Vec<ShotDescriptor>,
}

impl CaptureRequest {
    pub fn ev_offsets(&self) -> Vec<i8> {
        self.shots.iter().map(|s| s.ev_offset).collect()
    }
}

/// Still-capture collaborator. Per-shot results arrive later as
/// [`crate::domain::models::CameraEvent`]s, one per shot index, in any order.
pub trait Camera: Send {
    fn configure(&mut self, selection: &CameraSelection) -> Result<(), CameraError>;
    fn ae_compensation_range(&self) -> Option<AeCompensationRange>;
    fn capture_burst(&mut self, request: CaptureRequest) -> Result<(), CameraError>;
}

/// Gyroscope feed. Between `start` and `stop` the sensor is the only writer
/// of `energy`, typically from its own thread or task.
pub trait MotionSensor: Send {
    fn start(&mut self, energy: Arc<EnergyCell>);
    fn stop(&mut self);
}

/// Fire-and-forget sounds and status lines
pub trait Feedback: Send {
    fn play_start_cue(&mut self);
    fn play_complete_cue(&mut self);
    fn status(&mut self, message: StatusMessage);
}

/// One-shot cancellable timers. Expiry is delivered as `RigEvent::Timer`.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration, timer: TimerKind) -> TimerHandle;
    fn cancel(&self, handle: TimerHandle);
    fn now(&self) -> Instant;
}

/// What the sequencer needs from the turntable client
pub trait Turntable {
    fn is_ready(&self) -> bool;
    fn current_angle(&self) -> u16;
    fn send_rotate_command(&mut self, delta: u8) -> Result<(), TurntableError>;
}
