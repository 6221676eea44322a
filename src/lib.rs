//! Controller for a BLE-driven panorama turntable: rotates a camera through
//! a full revolution, waiting for the platform to settle before each
//! (optionally exposure-bracketed) capture.

pub mod app;
pub mod domain;
pub mod infrastructure;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use app::{RigApp, RigController};
