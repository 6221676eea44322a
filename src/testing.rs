//! In-memory collaborators for driving the controller deterministically.
//! Every fake is cheap to clone; clones share the same recorded state so a
//! test can keep one handle while the sequencer owns another.

use crate::domain::bracket::AeCompensationRange;
use crate::domain::models::{
    BurstId, CameraEvent, GyroSample, StatusMessage, TimerHandle, TimerKind, TurntableEvent,
};
use crate::domain::ports::{
    Camera, CameraError, CameraSelection, CaptureRequest, Feedback, MotionSensor, Scheduler,
    Turntable,
};
use crate::domain::sequencer::{CaptureSequencer, Collaborators, SequencerConfig};
use crate::domain::stability::EnergyCell;
use crate::infrastructure::turntable::client::TurntableError;
use crate::infrastructure::turntable::protocol::{NOTIFY_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID};
use crate::infrastructure::turntable::transport::{
    BleTransport, CharacteristicProps, DeviceAddress, GattCharacteristic, GattService,
    TransportError,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub handle: TimerHandle,
    pub due: Instant,
    pub timer: TimerKind,
}

#[derive(Debug)]
struct ManualClock {
    now: Instant,
    next_id: u64,
    pending: Vec<ScheduledTimer>,
}

/// Timers that only fire when the test says so
#[derive(Debug, Clone)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualClock>>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClock {
                now: Instant::now(),
                next_id: 1,
                pending: Vec::new(),
            })),
        }
    }

    pub fn pending(&self) -> Vec<ScheduledTimer> {
        lock(&self.inner).pending.clone()
    }

    /// Move the clock forward and return the timers that came due, in due order
    pub fn advance(&self, by: Duration) -> Vec<TimerKind> {
        let mut clock = lock(&self.inner);
        clock.now += by;
        let now = clock.now;
        let (mut due, rest): (Vec<_>, Vec<_>) =
            clock.pending.drain(..).partition(|t| t.due <= now);
        clock.pending = rest;
        due.sort_by_key(|t| t.due);
        due.into_iter().map(|t| t.timer).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, timer: TimerKind) -> TimerHandle {
        let mut clock = lock(&self.inner);
        let handle = TimerHandle(clock.next_id);
        clock.next_id += 1;
        let due = clock.now + delay;
        clock.pending.push(ScheduledTimer { handle, due, timer });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        lock(&self.inner).pending.retain(|t| t.handle != handle);
    }

    fn now(&self) -> Instant {
        lock(&self.inner).now
    }
}

#[derive(Debug, Default)]
struct CameraLog {
    selections: Vec<CameraSelection>,
    requests: Vec<CaptureRequest>,
    fail_next: Option<CameraError>,
}

/// Accepts every burst and records it; results are injected by the test
#[derive(Debug, Clone)]
pub struct RecordingCamera {
    range: Option<AeCompensationRange>,
    log: Arc<Mutex<CameraLog>>,
}

impl Default for RecordingCamera {
    fn default() -> Self {
        Self::new(Some(AeCompensationRange {
            min: -12,
            max: 12,
            step: 1.0 / 3.0,
        }))
    }
}

impl RecordingCamera {
    pub fn new(range: Option<AeCompensationRange>) -> Self {
        Self {
            range,
            log: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        lock(&self.log).requests.clone()
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        lock(&self.log).requests.last().cloned()
    }

    pub fn selections(&self) -> Vec<CameraSelection> {
        lock(&self.log).selections.clone()
    }

    pub fn fail_next_burst(&self, error: CameraError) {
        lock(&self.log).fail_next = Some(error);
    }

    /// Success events for every shot of the most recent burst
    pub fn successes_for_last(&self) -> Vec<CameraEvent> {
        self.last_request()
            .map(|request| {
                request
                    .shots
                    .iter()
                    .map(|s| CameraEvent::ShotSucceeded {
                        burst: request.burst,
                        shot: s.shot,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Camera for RecordingCamera {
    fn configure(&mut self, selection: &CameraSelection) -> Result<(), CameraError> {
        lock(&self.log).selections.push(selection.clone());
        Ok(())
    }

    fn ae_compensation_range(&self) -> Option<AeCompensationRange> {
        self.range
    }

    fn capture_burst(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        let mut log = lock(&self.log);
        if let Some(error) = log.fail_next.take() {
            return Err(error);
        }
        log.requests.push(request);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MotionLog {
    pub starts: u32,
    pub stops: u32,
    pub running: bool,
}

/// Records start/stop and lets the test play gyro samples into the energy
/// cell handed over at `start`
#[derive(Debug, Clone, Default)]
pub struct RecordingMotion {
    log: Arc<Mutex<MotionLog>>,
    energy: Arc<Mutex<Option<Arc<EnergyCell>>>>,
}

impl RecordingMotion {
    pub fn log(&self) -> MotionLog {
        *lock(&self.log)
    }

    /// Ignored unless the sensor is running
    pub fn feed(&self, sample: &GyroSample) {
        if !lock(&self.log).running {
            return;
        }
        if let Some(cell) = lock(&self.energy).as_ref() {
            cell.feed(sample);
        }
    }
}

impl MotionSensor for RecordingMotion {
    fn start(&mut self, energy: Arc<EnergyCell>) {
        let mut log = lock(&self.log);
        log.starts += 1;
        log.running = true;
        *lock(&self.energy) = Some(energy);
    }

    fn stop(&mut self) {
        let mut log = lock(&self.log);
        log.stops += 1;
        log.running = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEntry {
    StartCue,
    CompleteCue,
    Status(StatusMessage),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingFeedback {
    entries: Arc<Mutex<Vec<FeedbackEntry>>>,
}

impl RecordingFeedback {
    pub fn entries(&self) -> Vec<FeedbackEntry> {
        lock(&self.entries).clone()
    }

    pub fn count(&self, entry: &FeedbackEntry) -> usize {
        lock(&self.entries).iter().filter(|e| *e == entry).count()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter_map(|e| match e {
                FeedbackEntry::Status(status) => Some(status.message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Feedback for RecordingFeedback {
    fn play_start_cue(&mut self) {
        lock(&self.entries).push(FeedbackEntry::StartCue);
    }

    fn play_complete_cue(&mut self) {
        lock(&self.entries).push(FeedbackEntry::CompleteCue);
    }

    fn status(&mut self, message: StatusMessage) {
        lock(&self.entries).push(FeedbackEntry::Status(message));
    }
}

/// Turntable double for sequencer tests; angles are set by the test
#[derive(Debug, Default)]
pub struct FakeTurntable {
    pub ready: bool,
    pub angle: u16,
    pub commands: Vec<u8>,
    pub fail_next: Option<TurntableError>,
}

impl FakeTurntable {
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }
}

impl Turntable for FakeTurntable {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn current_angle(&self) -> u16 {
        self.angle
    }

    fn send_rotate_command(&mut self, delta: u8) -> Result<(), TurntableError> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        self.commands.push(delta);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartScan(Uuid),
    StopScan,
    Connect(DeviceAddress),
    DiscoverServices,
    SetNotify(Uuid, bool),
    Write(Uuid, Vec<u8>),
    Disconnect,
}

#[derive(Debug, Default)]
struct TransportLog {
    calls: Vec<TransportCall>,
    fail_scan: bool,
    fail_disconnect: bool,
}

/// Records port calls; the test plays the radio's replies
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.log).calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.log)
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Write(_, value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fail_scans(&self) {
        lock(&self.log).fail_scan = true;
    }

    pub fn fail_disconnects(&self) {
        lock(&self.log).fail_disconnect = true;
    }

    fn record(&self, call: TransportCall) {
        lock(&self.log).calls.push(call);
    }
}

impl BleTransport for RecordingTransport {
    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        if lock(&self.log).fail_scan {
            return Err(TransportError::Backend("adapter off".to_string()));
        }
        self.record(TransportCall::StartScan(service));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::StopScan);
        Ok(())
    }

    fn connect(&mut self, address: &DeviceAddress) -> Result<(), TransportError> {
        self.record(TransportCall::Connect(address.clone()));
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::DiscoverServices);
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), TransportError> {
        self.record(TransportCall::SetNotify(characteristic, enabled));
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        self.record(TransportCall::Write(characteristic, value.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect);
        if lock(&self.log).fail_disconnect {
            return Err(TransportError::Backend("peripheral gone".to_string()));
        }
        Ok(())
    }
}

/// GATT layout of the real turntable
pub fn axis_services() -> Vec<GattService> {
    vec![GattService {
        uuid: SERVICE_UUID,
        characteristics: vec![
            GattCharacteristic {
                uuid: WRITE_CHAR_UUID,
                props: CharacteristicProps {
                    write: true,
                    notify: false,
                },
            },
            GattCharacteristic {
                uuid: NOTIFY_CHAR_UUID,
                props: CharacteristicProps {
                    write: false,
                    notify: true,
                },
            },
        ],
    }]
}

/// A sequencer wired to recording fakes, plus the handles to inspect them
pub struct SequencerHarness {
    pub sequencer: CaptureSequencer,
    pub turntable: FakeTurntable,
    pub camera: RecordingCamera,
    pub motion: RecordingMotion,
    pub feedback: RecordingFeedback,
    pub scheduler: ManualScheduler,
}

impl SequencerHarness {
    pub fn new(config: SequencerConfig) -> Self {
        Self::with_camera(config, RecordingCamera::default())
    }

    pub fn with_camera(config: SequencerConfig, camera: RecordingCamera) -> Self {
        let motion = RecordingMotion::default();
        let feedback = RecordingFeedback::default();
        let scheduler = ManualScheduler::new();
        let collaborators = Collaborators {
            camera: Box::new(camera.clone()),
            motion: Box::new(motion.clone()),
            feedback: Box::new(feedback.clone()),
            scheduler: Arc::new(scheduler.clone()),
        };
        let mut sequencer = CaptureSequencer::new(config, collaborators);
        if let Err(e) = sequencer.configure_camera() {
            panic!("recording camera refused configuration: {}", e);
        }
        Self {
            sequencer,
            turntable: FakeTurntable::ready(),
            camera,
            motion,
            feedback,
            scheduler,
        }
    }

    pub fn start(&mut self) {
        self.sequencer.start_capture(&mut self.turntable);
    }

    /// Let every timer due within `by` fire
    pub fn advance(&mut self, by: Duration) {
        for timer in self.scheduler.advance(by) {
            self.sequencer.on_timer(timer);
        }
    }

    pub fn complete_burst(&mut self) {
        for event in self.camera.successes_for_last() {
            self.sequencer.on_camera_event(event, &mut self.turntable);
        }
    }

    pub fn fail_shot(&mut self, shot: usize, reason: &str) {
        let burst = self
            .camera
            .last_request()
            .map(|r| r.burst)
            .unwrap_or(BurstId { run: 0, step: 0 });
        self.sequencer.on_camera_event(
            CameraEvent::ShotFailed {
                burst,
                shot,
                reason: reason.to_string(),
            },
            &mut self.turntable,
        );
    }

    pub fn report_angle(&mut self, angle: u16) {
        self.turntable.angle = angle;
        self.sequencer
            .on_turntable_event(TurntableEvent::AngleChanged(angle), &mut self.turntable);
    }

    pub fn turntable_event(&mut self, event: TurntableEvent) {
        self.sequencer.on_turntable_event(event, &mut self.turntable);
    }

    /// Feed samples until the smoothed energy is well under the threshold
    pub fn settle(&mut self) {
        for _ in 0..40 {
            self.motion.feed(&GyroSample::default());
        }
    }

    pub fn shake(&mut self) {
        for _ in 0..5 {
            self.motion.feed(&GyroSample::new(0.0, 0.0, 1.0));
        }
    }

    /// First burst, then rotate-settle-capture for every remaining stop
    pub fn run_full_revolution(&mut self) {
        self.start();
        self.advance(Duration::from_millis(500));
        self.complete_burst();

        let step = self.sequencer.config().lens.step_degrees();
        let mut angle = 0;
        let max_stops = 360 / step + 1;
        for _ in 0..max_stops {
            if !self.sequencer.is_running() {
                break;
            }
            self.shake();
            angle = (angle + step) % 360;
            self.settle();
            self.report_angle(angle);
            if self.sequencer.has_burst_in_flight() {
                self.complete_burst();
            }
        }
    }
}
