use crate::domain::bracket::AeCompensationRange;
use crate::domain::models::{CameraEvent, RigEvent};
use crate::domain::ports::{Camera, CameraError, CameraSelection, CaptureRequest};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub exposure: Duration,
    pub ae_range: Option<AeCompensationRange>,
    /// Directory the file names are reported relative to
    pub output_dir: PathBuf,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            exposure: Duration::from_millis(40),
            // +-4 EV in 1/3 EV steps, typical for phone sensors
            ae_range: Some(AeCompensationRange {
                min: -12,
                max: 12,
                step: 1.0 / 3.0,
            }),
            output_dir: PathBuf::from("captures"),
        }
    }
}

/// Acknowledges every shot after the exposure delay without touching disk
pub struct SimulatedCamera {
    config: SimulatedCameraConfig,
    tx: mpsc::UnboundedSender<RigEvent>,
    runtime: Handle,
    selection: Option<CameraSelection>,
    busy: Arc<AtomicBool>,
    captured: Arc<Mutex<Vec<PathBuf>>>,
}

impl SimulatedCamera {
    /// Must be called from inside a tokio runtime
    pub fn new(config: SimulatedCameraConfig, tx: mpsc::UnboundedSender<RigEvent>) -> Self {
        Self {
            config,
            tx,
            runtime: Handle::current(),
            selection: None,
            busy: Arc::new(AtomicBool::new(false)),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Files "written" so far, shared with the capture tasks
    pub fn captured(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.captured)
    }
}

impl Camera for SimulatedCamera {
    fn configure(&mut self, selection: &CameraSelection) -> Result<(), CameraError> {
        if self.busy.load(Ordering::Acquire) {
            return Err(CameraError::Busy);
        }
        info!("Simulated camera opened {} lens", selection.lens.label());
        self.selection = Some(selection.clone());
        Ok(())
    }

    fn ae_compensation_range(&self) -> Option<AeCompensationRange> {
        self.config.ae_range
    }

    fn capture_burst(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        if self.selection.is_none() {
            return Err(CameraError::NotConfigured);
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(CameraError::Busy);
        }

        let tx = self.tx.clone();
        let busy = Arc::clone(&self.busy);
        let captured = Arc::clone(&self.captured);
        let exposure = self.config.exposure;
        let output_dir = self.config.output_dir.clone();
        let step = self.config.ae_range.map(|r| r.step).unwrap_or(0.0);

        self.runtime.spawn(async move {
            let last = request.shots.len().saturating_sub(1);
            for shot in &request.shots {
                tokio::time::sleep(exposure).await;
                let path = output_dir.join(&shot.file_name);
                debug!(
                    "Captured {} (compensation index {}, focus {})",
                    path.display(),
                    shot.compensation_index(step),
                    request.focus_distance
                );
                if let Ok(mut captured) = captured.lock() {
                    captured.push(path);
                }
                if shot.shot == last {
                    busy.store(false, Ordering::Release);
                }
                let event = CameraEvent::ShotSucceeded {
                    burst: request.burst,
                    shot: shot.shot,
                };
                if tx.send(RigEvent::Camera(event)).is_err() {
                    break;
                }
            }
            busy.store(false, Ordering::Release);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bracket::{BracketMode, BracketPlan};
    use crate::domain::models::{BurstId, Lens};

    fn request(mode: u8) -> CaptureRequest {
        let plan = BracketPlan::new(BracketMode::new(mode).unwrap());
        CaptureRequest {
            burst: BurstId { run: 1, step: 4 },
            file_index: 4,
            focus_distance: 0.4,
            shots: plan.shots(4),
        }
    }

    #[tokio::test]
    async fn test_capture_requires_configuration() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut camera = SimulatedCamera::new(SimulatedCameraConfig::default(), tx);
        assert_eq!(camera.capture_burst(request(0)), Err(CameraError::NotConfigured));
    }

    #[tokio::test]
    async fn test_burst_acknowledges_each_shot_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = SimulatedCameraConfig {
            exposure: Duration::from_millis(1),
            ..Default::default()
        };
        let mut camera = SimulatedCamera::new(config, tx);
        camera
            .configure(&CameraSelection::for_lens(Lens::Wide))
            .unwrap();

        camera.capture_burst(request(1)).unwrap();
        assert_eq!(camera.capture_burst(request(1)), Err(CameraError::Busy));

        let mut shots = Vec::new();
        while shots.len() < 3 {
            match rx.recv().await {
                Some(RigEvent::Camera(CameraEvent::ShotSucceeded { burst, shot })) => {
                    assert_eq!(burst, BurstId { run: 1, step: 4 });
                    shots.push(shot);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(shots, vec![0, 1, 2]);

        let files = camera.captured();
        let files = files.lock().unwrap();
        assert_eq!(
            files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect::<Vec<_>>(),
            vec!["4_EV0.jpg", "4_EV-1.jpg", "4_EV1.jpg"]
        );
    }
}
