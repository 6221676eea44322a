use crate::domain::models::GyroSample;
use crate::domain::ports::MotionSensor;
use crate::domain::stability::EnergyCell;
use crate::infrastructure::simulator::turntable::AxisHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Angular rate reported while the table turns (rad/s around z)
const MOVING_RATE: f32 = 0.8;
/// Sensor noise at rest, well under the settle threshold
const REST_NOISE: f32 = 0.001;

/// Gyroscope riding on the simulated axis
pub struct SimulatedMotion {
    axis: AxisHandle,
    period: Duration,
    runtime: Handle,
    task: Option<JoinHandle<()>>,
}

impl SimulatedMotion {
    /// Must be called from inside a tokio runtime
    pub fn new(axis: AxisHandle, period: Duration) -> Self {
        Self {
            axis,
            period,
            runtime: Handle::current(),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl MotionSensor for SimulatedMotion {
    fn start(&mut self, energy: Arc<EnergyCell>) {
        self.stop();
        let axis = self.axis.clone();
        let period = self.period;
        debug!("Simulated gyro started ({:?} period)", period);

        self.task = Some(self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut flip = false;
            loop {
                interval.tick().await;
                flip = !flip;
                let noise = if flip { REST_NOISE } else { -REST_NOISE };
                let sample = if axis.is_moving() {
                    GyroSample::new(noise, noise, MOVING_RATE)
                } else {
                    GyroSample::new(noise, -noise, noise)
                };
                energy.feed(&sample);
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Simulated gyro stopped");
        }
    }
}

impl Drop for SimulatedMotion {
    fn drop(&mut self) {
        self.stop();
    }
}
