//! Exposure Bracket Planner
//!
//! Fixed EV offset table per bracket mode, the AE-range rule deciding which
//! modes a camera can offer, and the file/EXIF naming applied to each shot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EV offsets per mode, in firing order
pub const EXPOSURE_BRACKET_TABLE: [&[i8]; 4] = [
    &[0],
    &[0, -1, 1],
    &[0, -2, -1, 1, 2],
    &[0, -3, -2, -1, 1, 2, 3],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BracketModeError {
    #[error("bracket mode {0} outside 0..=3")]
    OutOfRange(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BracketMode(u8);

impl BracketMode {
    pub const NONE: Self = Self(0);
    pub const MAX: u8 = 3;

    pub fn new(mode: u8) -> Result<Self, BracketModeError> {
        if mode > Self::MAX {
            return Err(BracketModeError::OutOfRange(mode));
        }
        Ok(Self(mode))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Largest absolute EV offset this mode shoots
    pub fn max_offset(&self) -> i8 {
        self.0 as i8
    }

    pub fn is_bracketing(&self) -> bool {
        self.0 != 0
    }

    pub fn label(&self) -> String {
        if self.0 == 0 {
            "None".to_string()
        } else {
            format!("+-{} EV", self.0)
        }
    }

    pub fn all() -> impl Iterator<Item = BracketMode> {
        (0..=Self::MAX).map(BracketMode)
    }
}

impl TryFrom<u8> for BracketMode {
    type Error = BracketModeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BracketMode> for u8 {
    fn from(mode: BracketMode) -> Self {
        mode.0
    }
}

/// EV offsets for `mode`, straight from the table
pub fn plan(mode: BracketMode) -> &'static [i8] {
    EXPOSURE_BRACKET_TABLE[mode.0 as usize]
}

// Absorbs rounding in fractional steps such as 1/3 EV
const EV_TOLERANCE: f32 = 1e-4;

/// Exposure-compensation capabilities reported by the camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AeCompensationRange {
    pub min: i32,
    pub max: i32,
    /// EV per compensation index
    pub step: f32,
}

impl AeCompensationRange {
    /// Largest positive EV the camera can reach
    pub fn max_ev(&self) -> f32 {
        self.max as f32 * self.step
    }
}

/// Modes the operator may pick for a camera with `range`.
/// "None" is always offered.
pub fn offered_modes(range: Option<&AeCompensationRange>) -> Vec<BracketMode> {
    BracketMode::all()
        .filter(|mode| match (mode.is_bracketing(), range) {
            (false, _) => true,
            (true, Some(range)) => mode.max_offset() as f32 <= range.max_ev() + EV_TOLERANCE,
            (true, None) => false,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureMode {
    AutoBracket,
}

/// EXIF fields the camera must write for a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExifTags {
    pub exposure_bias_value: Option<i8>,
    pub exposure_mode: Option<ExposureMode>,
}

/// Everything the camera needs to expose and store one frame of a burst
#[derive(Debug, Clone, PartialEq)]
pub struct ShotDescriptor {
    pub shot: usize,
    pub ev_offset: i8,
    pub file_name: String,
    pub exif: ExifTags,
}

impl ShotDescriptor {
    /// Compensation index for a camera whose index step is `step` EV
    pub fn compensation_index(&self, step: f32) -> i32 {
        if step <= 0.0 {
            return 0;
        }
        (self.ev_offset as f32 / step).round() as i32
    }
}

/// `{index}.jpg`, or `{index}_EV{offset}.jpg` while bracketing
pub fn shot_file_name(index: u32, ev_offset: i8, bracketing: bool) -> String {
    if bracketing {
        format!("{}_EV{}.jpg", index, ev_offset)
    } else {
        format!("{}.jpg", index)
    }
}

/// Offsets of one capture step and how many have been captured so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketPlan {
    mode: BracketMode,
    ev_offsets: &'static [i8],
    // Bit `i` set once shot `i` is captured
    captured: u16,
}

impl BracketPlan {
    pub fn new(mode: BracketMode) -> Self {
        Self {
            mode,
            ev_offsets: plan(mode),
            captured: 0,
        }
    }

    pub fn mode(&self) -> BracketMode {
        self.mode
    }

    pub fn ev_offsets(&self) -> &'static [i8] {
        self.ev_offsets
    }

    pub fn shot_count(&self) -> usize {
        self.ev_offsets.len()
    }

    pub fn captured_count(&self) -> usize {
        self.captured.count_ones() as usize
    }

    pub fn is_complete(&self) -> bool {
        self.captured_count() >= self.ev_offsets.len()
    }

    /// Count a successful capture by shot index, in any order. Duplicates and
    /// indices outside the plan are rejected.
    pub fn record_success(&mut self, shot: usize) -> bool {
        if shot >= self.ev_offsets.len() {
            return false;
        }
        let bit = 1u16 << shot;
        if self.captured & bit != 0 {
            return false;
        }
        self.captured |= bit;
        true
    }

    /// Shots for file `index`
    pub fn shots(&self, index: u32) -> Vec<ShotDescriptor> {
        let bracketing = self.mode.is_bracketing();
        self.ev_offsets
            .iter()
            .enumerate()
            .map(|(shot, &ev_offset)| ShotDescriptor {
                shot,
                ev_offset,
                file_name: shot_file_name(index, ev_offset, bracketing),
                exif: if bracketing {
                    ExifTags {
                        exposure_bias_value: Some(ev_offset),
                        exposure_mode: Some(ExposureMode::AutoBracket),
                    }
                } else {
                    ExifTags::default()
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_sizes() {
        assert_eq!(plan(BracketMode::NONE), &[0]);
        for mode in 1..=3u8 {
            let offsets = plan(BracketMode::new(mode).unwrap());
            assert_eq!(offsets.len(), 2 * mode as usize + 1);
        }
    }

    #[test]
    fn test_plan_is_symmetric_table_order() {
        assert_eq!(plan(BracketMode::new(2).unwrap()), &[0, -2, -1, 1, 2]);
        for mode in BracketMode::all() {
            let offsets = plan(mode);
            assert_eq!(offsets[0], 0);
            assert_eq!(offsets.iter().map(|&o| o as i32).sum::<i32>(), 0);
            assert_eq!(
                offsets.iter().map(|o| o.abs()).max(),
                Some(mode.max_offset())
            );
        }
    }

    #[test]
    fn test_mode_range() {
        assert_eq!(BracketMode::new(4), Err(BracketModeError::OutOfRange(4)));
        assert_eq!(BracketMode::try_from(3).map(|m| m.value()), Ok(3));
        assert_eq!(BracketMode::new(0).unwrap().label(), "None");
        assert_eq!(BracketMode::new(2).unwrap().label(), "+-2 EV");
    }

    #[test]
    fn test_offered_modes_follow_ae_range() {
        // +-2 EV in 1/3 steps
        let range = AeCompensationRange {
            min: -6,
            max: 6,
            step: 1.0 / 3.0,
        };
        let offered: Vec<u8> = offered_modes(Some(&range)).iter().map(|m| m.value()).collect();
        assert_eq!(offered, vec![0, 1, 2]);

        let wide = AeCompensationRange {
            min: -24,
            max: 24,
            step: 1.0 / 6.0,
        };
        assert_eq!(offered_modes(Some(&wide)).len(), 4);

        assert_eq!(offered_modes(None), vec![BracketMode::NONE]);
    }

    #[test]
    fn test_single_shot_naming() {
        let shots = BracketPlan::new(BracketMode::NONE).shots(7);
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].file_name, "7.jpg");
        assert_eq!(shots[0].exif, ExifTags::default());
    }

    #[test]
    fn test_bracket_naming_and_exif() {
        let shots = BracketPlan::new(BracketMode::new(1).unwrap()).shots(3);
        let names: Vec<&str> = shots.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["3_EV0.jpg", "3_EV-1.jpg", "3_EV1.jpg"]);
        assert_eq!(shots[1].exif.exposure_bias_value, Some(-1));
        assert_eq!(shots[1].exif.exposure_mode, Some(ExposureMode::AutoBracket));
    }

    #[test]
    fn test_compensation_index() {
        let shot = &BracketPlan::new(BracketMode::new(2).unwrap()).shots(0)[1];
        assert_eq!(shot.ev_offset, -2);
        assert_eq!(shot.compensation_index(1.0 / 3.0), -6);
        assert_eq!(shot.compensation_index(0.0), 0);
    }

    #[test]
    fn test_successes_counted_by_shot_index() {
        let mut plan = BracketPlan::new(BracketMode::new(1).unwrap());
        assert!(plan.record_success(0));
        assert!(!plan.record_success(0));
        assert!(plan.record_success(1));
        assert!(!plan.is_complete());
        assert!(plan.record_success(2));
        assert!(plan.is_complete());
        assert!(!plan.record_success(3));
    }

    #[test]
    fn test_out_of_order_successes_complete_the_step() {
        let mut plan = BracketPlan::new(BracketMode::new(2).unwrap());
        for shot in [4, 0, 2, 1] {
            assert!(plan.record_success(shot));
        }
        assert_eq!(plan.captured_count(), 4);
        assert!(!plan.is_complete());
        assert!(!plan.record_success(2));
        assert!(plan.record_success(3));
        assert!(plan.is_complete());
    }
}
