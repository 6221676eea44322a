use panorama_rig::app::{RigApp, RigController};
use panorama_rig::domain::models::{RigEvent, RunOutcome};
use panorama_rig::domain::ports::{MotionSensor, Scheduler};
use panorama_rig::domain::sequencer::{CaptureSequencer, Collaborators, SequencerConfig};
use panorama_rig::domain::settings::{JsonFileStore, SettingsService, TransportKind};
use panorama_rig::infrastructure::feedback::TracingFeedback;
use panorama_rig::infrastructure::logging;
use panorama_rig::infrastructure::scheduler::TokioScheduler;
use panorama_rig::infrastructure::simulator::{
    SimulatedAxisConfig, SimulatedCamera, SimulatedCameraConfig, SimulatedMotion,
    SimulatedTurntable,
};
use panorama_rig::infrastructure::turntable::client::DeviceProfile;
use panorama_rig::infrastructure::turntable::{BleTransport, TurntableClient};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const GYRO_PERIOD: Duration = Duration::from_millis(10);

fn main() -> ExitCode {
    // Optional first argument: settings file to use instead of the config dir
    let store = match std::env::args().nth(1) {
        Some(path) => Ok(JsonFileStore::new(path)),
        None => JsonFileStore::in_config_dir(),
    };
    let store = match store {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to locate settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let settings_path = store.path().to_path_buf();
    let settings = SettingsService::new(Box::new(store));

    let _logging_guard = logging::init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();
    info!("Starting panorama rig (settings: {})", settings_path.display());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(settings)) {
        Ok(RunOutcome::Completed { bursts }) => {
            info!("Revolution captured at {} positions", bursts);
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            warn!("Capture did not complete: {:?}", outcome);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: SettingsService) -> anyhow::Result<RunOutcome> {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(tx.clone()));
    let mut config = SequencerConfig::from(settings.get());

    let (transport, motion): (Box<dyn BleTransport>, Box<dyn MotionSensor>) =
        match settings.get().transport {
            TransportKind::Simulated => {
                info!("Using the simulated turntable");
                let axis = SimulatedTurntable::new(SimulatedAxisConfig::default(), tx.clone());
                let motion = SimulatedMotion::new(axis.handle(), GYRO_PERIOD);
                (Box::new(axis), Box::new(motion))
            }
            TransportKind::Btleplug => hardware_transport(tx.clone(), &mut config).await?,
        };

    let camera = SimulatedCamera::new(SimulatedCameraConfig::default(), tx.clone());
    let collaborators = Collaborators {
        camera: Box::new(camera),
        motion,
        feedback: Box::new(TracingFeedback::new()),
        scheduler: Arc::clone(&scheduler),
    };
    let mut sequencer = CaptureSequencer::new(config, collaborators);
    sequencer.configure_camera()?;

    let profile = DeviceProfile::from(&settings.get().turntable);
    let turntable = TurntableClient::new(transport, scheduler, profile);
    let controller = RigController::new(turntable, sequencer).with_settings(settings);

    let mut app = RigApp::new(controller, tx, rx);
    let outcome = app.run_single_revolution().await;
    if let Err(e) = app.sender().send(RigEvent::Shutdown) {
        warn!("Failed to queue shutdown: {}", e);
    }
    app.run().await;
    outcome
}

#[cfg(feature = "btleplug")]
async fn hardware_transport(
    tx: mpsc::UnboundedSender<RigEvent>,
    config: &mut SequencerConfig,
) -> anyhow::Result<(Box<dyn BleTransport>, Box<dyn MotionSensor>)> {
    use panorama_rig::domain::stability::EnergyCell;
    use panorama_rig::infrastructure::turntable::btleplug_transport::BtleplugTransport;

    struct NoGyro;
    impl MotionSensor for NoGyro {
        fn start(&mut self, _energy: Arc<EnergyCell>) {}
        fn stop(&mut self) {}
    }

    warn!("No gyroscope on this host; settling on dwell time only");
    config.use_gyro = false;
    config.stability.min_dwell_ms.get_or_insert(1500);

    let transport = BtleplugTransport::new(tx).await?;
    Ok((Box::new(transport), Box::new(NoGyro)))
}

#[cfg(not(feature = "btleplug"))]
async fn hardware_transport(
    _tx: mpsc::UnboundedSender<RigEvent>,
    _config: &mut SequencerConfig,
) -> anyhow::Result<(Box<dyn BleTransport>, Box<dyn MotionSensor>)> {
    anyhow::bail!("Built without the \"btleplug\" feature; set \"transport\" to \"simulated\"")
}
