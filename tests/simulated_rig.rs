use std::sync::Arc;
use std::time::Duration;

use panorama_rig::app::{RigApp, RigController};
use panorama_rig::domain::models::{AbortReason, RigCommand, RigEvent, RunOutcome};
use panorama_rig::domain::ports::Scheduler;
use panorama_rig::domain::sequencer::{CaptureSequencer, Collaborators, SequencerConfig};
use panorama_rig::domain::settings::{MemoryStore, Settings, SettingsService};
use panorama_rig::infrastructure::scheduler::TokioScheduler;
use panorama_rig::infrastructure::simulator::{
    AxisHandle, SimulatedAxisConfig, SimulatedCamera, SimulatedCameraConfig, SimulatedMotion,
    SimulatedTurntable,
};
use panorama_rig::infrastructure::turntable::client::DeviceProfile;
use panorama_rig::infrastructure::turntable::TurntableClient;
use panorama_rig::testing::RecordingFeedback;
use tokio::sync::mpsc;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

struct SimulatedRig {
    app: RigApp,
    axis: AxisHandle,
    feedback: RecordingFeedback,
}

fn build(settings: Settings, tick: Duration) -> SimulatedRig {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(tx.clone()));

    let axis = SimulatedTurntable::new(
        SimulatedAxisConfig {
            tick,
            idle_notify_interval: Duration::from_millis(20),
            link_latency: Duration::from_millis(1),
            ..Default::default()
        },
        tx.clone(),
    );
    let handle = axis.handle();
    let motion = SimulatedMotion::new(axis.handle(), Duration::from_millis(1));
    let camera = SimulatedCamera::new(
        SimulatedCameraConfig {
            exposure: Duration::from_millis(1),
            ..Default::default()
        },
        tx.clone(),
    );
    let feedback = RecordingFeedback::default();

    let mut sequencer = CaptureSequencer::new(
        SequencerConfig::from(&settings),
        Collaborators {
            camera: Box::new(camera),
            motion: Box::new(motion),
            feedback: Box::new(feedback.clone()),
            scheduler: Arc::clone(&scheduler),
        },
    );
    sequencer
        .configure_camera()
        .expect("simulated camera should open");

    let turntable = TurntableClient::new(
        Box::new(axis),
        scheduler,
        DeviceProfile::from(&settings.turntable),
    );
    let controller = RigController::new(turntable, sequencer)
        .with_settings(SettingsService::new(Box::new(MemoryStore::with(settings))));

    SimulatedRig {
        app: RigApp::new(controller, tx, rx),
        axis: handle,
        feedback,
    }
}

fn fast_settings() -> Settings {
    Settings {
        first_shot_delay_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn simulated_revolution_completes_back_at_zero() {
    let mut rig = build(fast_settings(), Duration::from_millis(1));

    let outcome = tokio::time::timeout(TEST_TIMEOUT, rig.app.run_single_revolution())
        .await
        .expect("revolution should finish in time")
        .expect("revolution should run");

    assert_eq!(outcome, RunOutcome::Completed { bursts: 12 });
    assert_eq!(rig.axis.commands(), vec![30; 12]);
    assert_eq!(rig.axis.angle(), 0);
    assert!(rig
        .feedback
        .messages()
        .iter()
        .any(|m| m.contains("Capture complete")));
}

#[tokio::test]
async fn simulated_bracketed_revolution_with_ultra_wide_lens() {
    let settings = Settings {
        exposure_bracket_mode: 1,
        lens: panorama_rig::domain::models::Lens::UltraWide,
        ..fast_settings()
    };
    let mut rig = build(settings, Duration::from_millis(1));

    let outcome = tokio::time::timeout(TEST_TIMEOUT, rig.app.run_single_revolution())
        .await
        .expect("revolution should finish in time")
        .expect("revolution should run");

    assert_eq!(outcome, RunOutcome::Completed { bursts: 6 });
    assert_eq!(rig.axis.commands(), vec![60; 6]);
}

#[tokio::test]
async fn link_loss_mid_run_aborts() {
    let mut rig = build(fast_settings(), Duration::from_millis(3));
    let axis = rig.axis.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        axis.drop_link();
    });

    let outcome = tokio::time::timeout(TEST_TIMEOUT, rig.app.run_single_revolution())
        .await
        .expect("run should end in time")
        .expect("run should start");

    assert_eq!(outcome, RunOutcome::Aborted(AbortReason::Disconnected));
    assert!(rig.axis.commands().len() < 12);
    assert!(!rig.app.controller().sequencer().is_running());
}

#[tokio::test]
async fn bracket_choice_is_persisted() {
    let mut rig = build(fast_settings(), Duration::from_millis(1));
    let tx = rig.app.sender();

    tx.send(RigEvent::Command(RigCommand::SetBracketMode(2)))
        .unwrap();
    tx.send(RigEvent::Command(RigCommand::SetUseGyro(false)))
        .unwrap();
    tx.send(RigEvent::Shutdown).unwrap();
    tokio::time::timeout(TEST_TIMEOUT, rig.app.run())
        .await
        .expect("controller should shut down");

    let controller = rig.app.into_controller();
    let settings = controller.settings().expect("settings attached").get();
    assert_eq!(settings.exposure_bracket_mode, 2);
    assert!(!settings.use_gyro_stability_gate);
    assert!(!controller.sequencer().gate().is_enabled());
}
