//! Stability Gate
//!
//! Decides whether the platform has physically stopped after a rotation,
//! from an exponentially smoothed gyroscope magnitude.

use crate::domain::models::GyroSample;
use crate::domain::settings::StabilitySettings;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Energy reported until real samples arrive
pub const ENERGY_SENTINEL: f32 = 10.0;

/// Smoothed gyro energy shared between the sensor callback (sole writer)
/// and the sequencer (sole reader).
#[derive(Debug)]
pub struct EnergyCell {
    bits: AtomicU32,
    alpha: f32,
}

impl EnergyCell {
    pub fn new(alpha: f32) -> Self {
        Self {
            bits: AtomicU32::new(ENERGY_SENTINEL.to_bits()),
            alpha,
        }
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn reset(&self) {
        self.bits
            .store(ENERGY_SENTINEL.to_bits(), Ordering::Release);
    }

    /// `energy = alpha * |gyro| + (1 - alpha) * energy`
    pub fn feed(&self, sample: &GyroSample) -> f32 {
        let previous = self.load();
        let energy = self.alpha * sample.magnitude() + (1.0 - self.alpha) * previous;
        self.bits.store(energy.to_bits(), Ordering::Release);
        energy
    }
}

pub struct StabilityGate {
    energy: Arc<EnergyCell>,
    enabled: bool,
    threshold: f32,
    min_dwell: Option<Duration>,
    last_command_at: Option<Instant>,
}

impl StabilityGate {
    pub fn new(settings: &StabilitySettings, use_gyro: bool) -> Self {
        Self {
            energy: Arc::new(EnergyCell::new(settings.smoothing_alpha)),
            enabled: use_gyro,
            threshold: settings.settle_threshold,
            min_dwell: settings.min_dwell_ms.map(Duration::from_millis),
            last_command_at: None,
        }
    }

    /// Handle for sensors that deliver samples on their own thread
    pub fn energy_cell(&self) -> Arc<EnergyCell> {
        Arc::clone(&self.energy)
    }

    pub fn energy(&self) -> f32 {
        self.energy.load()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Called whenever motion sensing (re)starts
    pub fn reset(&mut self) {
        self.energy.reset();
        self.last_command_at = None;
    }

    pub fn feed(&self, sample: &GyroSample) -> f32 {
        self.energy.feed(sample)
    }

    /// Start of the dwell window
    pub fn note_command(&mut self, at: Instant) {
        self.last_command_at = Some(at);
    }

    pub fn is_settled(&self, now: Instant) -> bool {
        let still = !self.enabled || self.energy.load() < self.threshold;
        let dwelled = match (self.min_dwell, self.last_command_at) {
            (Some(dwell), Some(sent)) => now.saturating_duration_since(sent) >= dwell,
            _ => true,
        };
        still && dwelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(use_gyro: bool) -> StabilityGate {
        StabilityGate::new(&StabilitySettings::default(), use_gyro)
    }

    #[test]
    fn test_not_settled_before_samples() {
        let gate = gate(true);
        assert_eq!(gate.energy(), ENERGY_SENTINEL);
        assert!(!gate.is_settled(Instant::now()));
    }

    #[test]
    fn test_disabled_gate_always_settled() {
        let gate = gate(false);
        gate.feed(&GyroSample::new(5.0, 5.0, 5.0));
        assert!(gate.is_settled(Instant::now()));
    }

    #[test]
    fn test_smoothing_formula() {
        let gate = gate(true);
        let energy = gate.feed(&GyroSample::new(1.0, 0.0, 0.0));
        assert!((energy - (0.4 + 0.6 * ENERGY_SENTINEL)).abs() < 1e-5);
    }

    #[test]
    fn test_decay_settles_exactly_once() {
        let gate = gate(true);
        let now = Instant::now();
        let mut transitions = 0;
        let mut settled = gate.is_settled(now);
        let mut magnitude = 2.0f32;

        for _ in 0..200 {
            magnitude *= 0.8;
            let energy = gate.feed(&GyroSample::new(magnitude, 0.0, 0.0));
            let now_settled = gate.is_settled(now);
            assert_eq!(now_settled, energy < 0.01);
            if now_settled != settled {
                transitions += 1;
                assert!(now_settled, "gate must not fall back to unsettled");
            }
            settled = now_settled;
        }

        assert!(settled);
        assert_eq!(transitions, 1);
    }

    #[test]
    fn test_reset_restores_sentinel() {
        let mut gate = gate(true);
        for _ in 0..50 {
            gate.feed(&GyroSample::default());
        }
        assert!(gate.is_settled(Instant::now()));
        gate.reset();
        assert!(!gate.is_settled(Instant::now()));
    }

    #[test]
    fn test_dwell_combines_with_gyro() {
        let settings = StabilitySettings {
            min_dwell_ms: Some(500),
            ..Default::default()
        };
        let mut gate = StabilityGate::new(&settings, false);
        let sent = Instant::now();
        gate.note_command(sent);
        assert!(!gate.is_settled(sent + Duration::from_millis(100)));
        assert!(gate.is_settled(sent + Duration::from_millis(500)));

        gate.set_enabled(true);
        assert!(!gate.is_settled(sent + Duration::from_millis(600)));
    }

    #[test]
    fn test_energy_cell_shared_across_threads() {
        let gate = gate(true);
        let cell = gate.energy_cell();
        std::thread::spawn(move || {
            for _ in 0..50 {
                cell.feed(&GyroSample::default());
            }
        })
        .join()
        .unwrap();
        assert!(gate.energy() < 0.01);
    }
}
