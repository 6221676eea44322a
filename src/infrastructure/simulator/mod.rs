//! Software stand-ins for the rig hardware, used by the default binary mode
//! and by the async tests.

pub mod camera;
pub mod motion;
pub mod turntable;

pub use camera::{SimulatedCamera, SimulatedCameraConfig};
pub use motion::SimulatedMotion;
pub use turntable::{AxisHandle, SimulatedAxisConfig, SimulatedTurntable};
