use crate::infrastructure::turntable::transport::TransportEvent;
use serde::{Deserialize, Serialize};

/// Active camera lens; decides how far the table turns between shots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    #[default]
    Wide,
    UltraWide,
}

impl Lens {
    /// Degrees per rotation step
    pub fn step_degrees(&self) -> u16 {
        match self {
            Self::Wide => 30,
            Self::UltraWide => 60,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Wide => "Wide",
            Self::UltraWide => "Ultra Wide",
        }
    }
}

/// One raw gyroscope reading (rad/s per axis)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GyroSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl GyroSample {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Sum of absolute axis rates
    pub fn magnitude(&self) -> f32 {
        self.x.abs() + self.y.abs() + self.z.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Discovering,
    Ready,
}

/// What the turntable client reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurntableEvent {
    /// Notifications are enabled and commands may be sent
    Connected,
    /// An established session ended
    Disconnected,
    /// A connection attempt ended without reaching `Ready`
    ConnectionFailed(String),
    AngleChanged(u16),
}

/// Identity of one capture burst. `run` is the sequencer epoch that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BurstId {
    pub run: u64,
    pub step: u32,
}

/// Per-shot results reported asynchronously by the camera
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    ShotSucceeded {
        burst: BurstId,
        shot: usize,
    },
    ShotFailed {
        burst: BurstId,
        shot: usize,
        reason: String,
    },
}

/// One-shot timers; each carries the epoch it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    FirstShot { run: u64 },
    ResetRemainder { session: u64, delta: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Operator requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RigCommand {
    Connect,
    Disconnect,
    StartCapture,
    StopCapture,
    ResetToZero,
    SetLens(Lens),
    SetBracketMode(u8),
    SetUseGyro(bool),
}

/// Everything delivered to the serialized controller queue
#[derive(Debug, Clone)]
pub enum RigEvent {
    Command(RigCommand),
    Transport(TransportEvent),
    Camera(CameraEvent),
    Timer(TimerKind),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    AwaitingFirstSettle,
    Shooting,
    AwaitingStep,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Disconnected,
    CaptureFailed(String),
    RotateFailed(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "turntable disconnected"),
            Self::CaptureFailed(reason) => write!(f, "capture failed: {}", reason),
            Self::RotateFailed(reason) => write!(f, "rotate command failed: {}", reason),
        }
    }
}

/// How the last capture run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { bursts: u32 },
    Aborted(AbortReason),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lens_steps() {
        assert_eq!(Lens::Wide.step_degrees(), 30);
        assert_eq!(Lens::UltraWide.step_degrees(), 60);
        assert_eq!(360 % Lens::UltraWide.step_degrees(), 0);
    }

    #[test]
    fn test_gyro_magnitude_sums_absolute_axes() {
        let sample = GyroSample::new(-0.5, 0.25, -0.25);
        assert!((sample.magnitude() - 1.0).abs() < f32::EPSILON);
    }
}
