//! Matterport Axis Protocol
//!
//! Frame layouts and identifiers for the motorized turntable.

use thiserror::Error;
use uuid::Uuid;

/// Name the turntable advertises
pub const DEVICE_NAME: &str = "Matterport Axis";

/// Primary service (0xFFE0 on the Bluetooth base UUID)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Write-only characteristic taking rotate commands
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Notify characteristic reporting the current angle
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffe4_0000_1000_8000_00805f9b34fb);

/// Both command and notification frames are 6 bytes long
pub const FRAME_LEN: usize = 6;

/// Exclusive upper bound of a reported angle
pub const FULL_TURN_DEGREES: u16 = 360;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame length: {actual} (expected {expected})")]
    WrongLength { expected: usize, actual: usize },
    #[error("reported angle {0} outside 0..360")]
    AngleOutOfRange(u16),
    #[error("rotate command halves disagree: {0} != {1}")]
    MismatchedDelta(u8, u8),
}

/// Build a rotate command
///
/// # Command Frame (6 bytes)
///
/// ```text
/// [0-1] : 0x00
/// [2]   : delta degrees
/// [3-4] : 0x00
/// [5]   : delta degrees (mirror of [2])
/// ```
pub fn encode_rotate_command(delta: u8) -> [u8; FRAME_LEN] {
    [0x00, 0x00, delta, 0x00, 0x00, delta]
}

/// Parse an angle notification
///
/// # Notification Frame (6 bytes)
///
/// ```text
/// [0-1] : device header
/// [2-3] : angle in degrees (u16 big-endian)
/// [4-5] : device trailer
/// ```
pub fn decode_angle_notification(bytes: &[u8]) -> Result<u16, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::WrongLength {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let angle = u16::from_be_bytes([bytes[2], bytes[3]]);
    if angle >= FULL_TURN_DEGREES {
        return Err(FrameError::AngleOutOfRange(angle));
    }

    Ok(angle)
}

/// Device side of [`encode_rotate_command`], used by the simulated turntable
pub fn decode_rotate_command(bytes: &[u8]) -> Result<u8, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::WrongLength {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[2] != bytes[5] {
        return Err(FrameError::MismatchedDelta(bytes[2], bytes[5]));
    }
    Ok(bytes[2])
}

/// Device side of [`decode_angle_notification`]
pub fn encode_angle_notification(angle: u16) -> [u8; FRAME_LEN] {
    let [hi, lo] = (angle % FULL_TURN_DEGREES).to_be_bytes();
    // Header/trailer bytes as observed on the device
    [0x4E, 0x00, hi, lo, 0x00, 0x4F]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_command_mirrors_delta() {
        assert_eq!(encode_rotate_command(30), [0, 0, 30, 0, 0, 30]);
        assert_eq!(encode_rotate_command(0xFF), [0, 0, 0xFF, 0, 0, 0xFF]);
        assert_eq!(encode_rotate_command(0), [0; 6]);
    }

    #[test]
    fn test_decode_big_endian_angle() {
        assert_eq!(decode_angle_notification(&[0x4E, 0, 0, 1, 0, 0x4F]), Ok(1));
        assert_eq!(decode_angle_notification(&[0, 0, 1, 0x0E, 0, 0]), Ok(270));
        assert_eq!(decode_angle_notification(&[0, 0, 1, 0x67, 0, 0]), Ok(359));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert_eq!(
            decode_angle_notification(&[0, 0, 0, 30]),
            Err(FrameError::WrongLength {
                expected: 6,
                actual: 4
            })
        );
        assert!(decode_angle_notification(&[]).is_err());
        assert!(decode_angle_notification(&[0; 7]).is_err());
    }

    #[test]
    fn test_decode_rejects_angle_past_full_turn() {
        assert_eq!(
            decode_angle_notification(&[0, 0, 1, 0x68, 0, 0]),
            Err(FrameError::AngleOutOfRange(360))
        );
    }

    #[test]
    fn test_command_and_notification_layouts_are_independent() {
        // A command frame fed to the notification decoder must never read back as the delta.
        for delta in 1..=u8::MAX {
            let frame = encode_rotate_command(delta);
            assert_ne!(decode_angle_notification(&frame), Ok(delta as u16));
        }
        // Likewise a notification is not a valid rotate command.
        assert!(decode_rotate_command(&encode_angle_notification(30)).is_err());
    }

    #[test]
    fn test_simulator_helpers() {
        assert_eq!(decode_rotate_command(&encode_rotate_command(60)), Ok(60));
        assert_eq!(
            decode_angle_notification(&encode_angle_notification(359)),
            Ok(359)
        );
        assert_eq!(
            decode_angle_notification(&encode_angle_notification(360)),
            Ok(0)
        );
    }

    #[test]
    fn test_uuids_use_bluetooth_base() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            NOTIFY_CHAR_UUID.to_string(),
            "0000ffe4-0000-1000-8000-00805f9b34fb"
        );
    }
}
