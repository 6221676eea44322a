//! Turntable Client
//!
//! BLE session for the turntable:
//! `Disconnected → Scanning → Connecting → Discovering → Ready`.
//! Only `Ready` accepts commands, and `Ready` is reached only after the
//! notify characteristic is confirmed subscribed.

use crate::domain::models::{ConnectionState, TimerHandle, TimerKind, TurntableEvent};
use crate::domain::ports::{Scheduler, Turntable};
use crate::domain::settings::TurntableSettings;
use crate::infrastructure::turntable::protocol::{self, FULL_TURN_DEGREES};
use crate::infrastructure::turntable::transport::{
    BleTransport, DeviceAddress, GattService, TransportError, TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurntableError {
    #[error("turntable not ready (state: {0:?})")]
    NotReady(ConnectionState),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Identifiers of the single device profile this client speaks
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device_name: String,
    pub service_uuid: Uuid,
    pub write_char_uuid: Uuid,
    pub notify_char_uuid: Uuid,
    pub reset_split_delay: Duration,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::from(&TurntableSettings::default())
    }
}

impl From<&TurntableSettings> for DeviceProfile {
    fn from(settings: &TurntableSettings) -> Self {
        Self {
            device_name: settings.device_name.clone(),
            service_uuid: settings.service_uuid,
            write_char_uuid: settings.write_char_uuid,
            notify_char_uuid: settings.notify_char_uuid,
            reset_split_delay: settings.reset_split_delay(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurntableSession {
    pub state: ConnectionState,
    pub current_angle: u16,
    pub device: Option<DeviceAddress>,
    pub write_characteristic: Option<Uuid>,
    pub notify_characteristic: Option<Uuid>,
}

/// Rotations that bring the table from `angle` back to zero.
/// Each command carries at most one byte of degrees.
pub fn plan_reset_rotation(angle: u16) -> Vec<u8> {
    let zero_degree = (FULL_TURN_DEGREES - angle % FULL_TURN_DEGREES) % FULL_TURN_DEGREES;
    match zero_degree {
        0 => Vec::new(),
        d if d > u8::MAX as u16 => vec![u8::MAX, (d - u8::MAX as u16) as u8],
        d => vec![d as u8],
    }
}

pub struct TurntableClient {
    transport: Box<dyn BleTransport>,
    scheduler: Arc<dyn Scheduler>,
    profile: DeviceProfile,
    session: TurntableSession,
    // Bumped on every reset so stale timers from an old session are ignored
    session_epoch: u64,
    reset_timer: Option<TimerHandle>,
}

impl TurntableClient {
    pub fn new(
        transport: Box<dyn BleTransport>,
        scheduler: Arc<dyn Scheduler>,
        profile: DeviceProfile,
    ) -> Self {
        Self {
            transport,
            scheduler,
            profile,
            session: TurntableSession::default(),
            session_epoch: 0,
            reset_timer: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state
    }

    pub fn session(&self) -> &TurntableSession {
        &self.session
    }

    /// Begin a filtered scan. Restarts a scan already in progress; a no-op
    /// while connecting or connected.
    pub fn connect(&mut self) -> Result<(), TurntableError> {
        match self.session.state {
            ConnectionState::Ready => {
                info!("Turntable already connected");
                return Ok(());
            }
            ConnectionState::Connecting | ConnectionState::Discovering => {
                info!("Connection attempt already in progress");
                return Ok(());
            }
            ConnectionState::Scanning => {
                if let Err(e) = self.transport.stop_scan() {
                    warn!("Failed to stop previous scan: {}", e);
                }
            }
            ConnectionState::Disconnected => {}
        }

        info!(
            "Scanning for '{}' (service {})",
            self.profile.device_name, self.profile.service_uuid
        );
        if let Err(e) = self.transport.start_scan(self.profile.service_uuid) {
            error!("Failed to start scan: {}", e);
            self.reset_session();
            return Err(e.into());
        }
        self.session.state = ConnectionState::Scanning;
        Ok(())
    }

    /// User-initiated teardown. Returns `Disconnected` if a session or
    /// attempt was active.
    pub fn disconnect(&mut self) -> Option<TurntableEvent> {
        match self.session.state {
            ConnectionState::Disconnected => return None,
            ConnectionState::Scanning => {
                if let Err(e) = self.transport.stop_scan() {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            _ => {
                if let Some(notify) = self.session.notify_characteristic {
                    if let Err(e) = self.transport.set_notify(notify, false) {
                        debug!("Failed to disable notifications: {}", e);
                    }
                }
                if let Err(e) = self.transport.disconnect() {
                    warn!("Transport disconnect failed: {}", e);
                }
            }
        }

        info!("Disconnected from turntable");
        self.reset_session();
        Some(TurntableEvent::Disconnected)
    }

    /// Rotate back to zero, splitting rotations past one byte into two
    /// commands separated by the configured delay.
    pub fn reset_to_zero(&mut self) -> Result<(), TurntableError> {
        self.ensure_ready()?;

        let commands = plan_reset_rotation(self.session.current_angle);
        info!(
            "Resetting from {}° with commands {:?}",
            self.session.current_angle, commands
        );

        let mut commands = commands.into_iter();
        if let Some(first) = commands.next() {
            self.write_rotate(first)?;
        }
        if let Some(remainder) = commands.next() {
            if let Some(previous) = self.reset_timer.take() {
                self.scheduler.cancel(previous);
            }
            let handle = self.scheduler.schedule_once(
                self.profile.reset_split_delay,
                TimerKind::ResetRemainder {
                    session: self.session_epoch,
                    delta: remainder,
                },
            );
            self.reset_timer = Some(handle);
        }
        Ok(())
    }

    pub fn on_timer(&mut self, timer: TimerKind) {
        let TimerKind::ResetRemainder { session, delta } = timer else {
            return;
        };
        if session != self.session_epoch {
            debug!("Ignoring reset remainder from an earlier session");
            return;
        }
        self.reset_timer = None;
        if let Err(e) = self.write_rotate(delta) {
            warn!("Failed to send reset remainder: {}", e);
        }
    }

    /// Advance the session from a transport callback. Returns what the owner
    /// should hear about, if anything.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Option<TurntableEvent> {
        match event {
            TransportEvent::DeviceDiscovered { name, address } => {
                self.on_device_discovered(name, address)
            }
            TransportEvent::ScanFailed(reason) => {
                if self.session.state == ConnectionState::Scanning {
                    self.fail(format!("Scan failed: {}", reason))
                } else {
                    None
                }
            }
            TransportEvent::Connected => {
                if self.session.state != ConnectionState::Connecting {
                    debug!("Ignoring link-up in state {:?}", self.session.state);
                    return None;
                }
                info!("Link established, discovering services");
                self.session.state = ConnectionState::Discovering;
                match self.transport.discover_services() {
                    Ok(()) => None,
                    Err(e) => self.fail(format!("Service discovery failed: {}", e)),
                }
            }
            TransportEvent::ConnectFailed(reason) => {
                if self.is_attempting() {
                    self.fail(format!("Connection failed: {}", reason))
                } else {
                    None
                }
            }
            TransportEvent::ServicesDiscovered(services) => self.on_services_discovered(&services),
            TransportEvent::ServiceDiscoveryFailed(reason) => {
                if self.session.state == ConnectionState::Discovering {
                    self.fail(format!("Service discovery failed: {}", reason))
                } else {
                    None
                }
            }
            TransportEvent::NotificationsEnabled(characteristic) => {
                if self.session.state != ConnectionState::Discovering
                    || self.session.notify_characteristic != Some(characteristic)
                {
                    return None;
                }
                info!("Angle notifications enabled, turntable ready");
                self.session.state = ConnectionState::Ready;
                Some(TurntableEvent::Connected)
            }
            TransportEvent::NotificationsFailed {
                characteristic,
                reason,
            } => {
                if self.session.state == ConnectionState::Discovering
                    && self.session.notify_characteristic == Some(characteristic)
                {
                    self.fail(format!("Failed to enable notifications: {}", reason))
                } else {
                    None
                }
            }
            TransportEvent::ValueNotified {
                characteristic,
                value,
            } => self.on_notification(characteristic, &value),
            TransportEvent::WriteCompleted {
                characteristic,
                result,
            } => {
                match result {
                    Ok(()) => debug!("Write to {} confirmed", characteristic),
                    Err(e) => warn!("Write to {} not confirmed: {}", characteristic, e),
                }
                None
            }
            TransportEvent::Disconnected => {
                let previous = self.session.state;
                // No link exists before a device is found, so this belongs to
                // a session that was already torn down
                if matches!(
                    previous,
                    ConnectionState::Disconnected | ConnectionState::Scanning
                ) {
                    debug!("Ignoring link-down while {:?}", previous);
                    return None;
                }
                self.reset_session();
                if previous == ConnectionState::Ready {
                    warn!("Turntable disconnected");
                    Some(TurntableEvent::Disconnected)
                } else {
                    warn!("Link dropped while {:?}", previous);
                    Some(TurntableEvent::ConnectionFailed(format!(
                        "Disconnected while {:?}",
                        previous
                    )))
                }
            }
        }
    }

    fn on_device_discovered(
        &mut self,
        name: Option<String>,
        address: DeviceAddress,
    ) -> Option<TurntableEvent> {
        if self.session.state != ConnectionState::Scanning {
            return None;
        }
        if name.as_deref() != Some(self.profile.device_name.as_str()) {
            debug!("Skipping {} ({:?})", address, name);
            return None;
        }

        info!("Found {} at {}", self.profile.device_name, address);
        if let Err(e) = self.transport.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        self.session.state = ConnectionState::Connecting;
        self.session.device = Some(address.clone());
        match self.transport.connect(&address) {
            Ok(()) => None,
            Err(e) => self.fail(format!("Connection failed: {}", e)),
        }
    }

    fn on_services_discovered(&mut self, services: &[GattService]) -> Option<TurntableEvent> {
        if self.session.state != ConnectionState::Discovering {
            return None;
        }

        let Some(service) = services
            .iter()
            .find(|s| s.uuid == self.profile.service_uuid)
        else {
            return self.fail("Turntable service not found".to_string());
        };
        info!("Found turntable service");

        let has = |uuid: Uuid| service.characteristics.iter().any(|c| c.uuid == uuid);
        if !has(self.profile.write_char_uuid) {
            return self.fail("Write characteristic not found".to_string());
        }
        if !has(self.profile.notify_char_uuid) {
            return self.fail("Notify characteristic not found".to_string());
        }

        self.session.write_characteristic = Some(self.profile.write_char_uuid);
        self.session.notify_characteristic = Some(self.profile.notify_char_uuid);

        info!("Enabling angle notifications...");
        match self.transport.set_notify(self.profile.notify_char_uuid, true) {
            Ok(()) => None,
            Err(e) => self.fail(format!("Failed to enable notifications: {}", e)),
        }
    }

    fn on_notification(&mut self, characteristic: Uuid, value: &[u8]) -> Option<TurntableEvent> {
        if self.session.notify_characteristic != Some(characteristic)
            || self.session.state != ConnectionState::Ready
        {
            debug!("Ignoring notification from {}", characteristic);
            return None;
        }

        match protocol::decode_angle_notification(value) {
            Ok(angle) => {
                debug!("Angle notification {:02X?} -> {}°", value, angle);
                self.session.current_angle = angle;
                Some(TurntableEvent::AngleChanged(angle))
            }
            Err(e) => {
                warn!("Dropping angle notification {:02X?}: {}", value, e);
                None
            }
        }
    }

    fn is_attempting(&self) -> bool {
        matches!(
            self.session.state,
            ConnectionState::Scanning | ConnectionState::Connecting | ConnectionState::Discovering
        )
    }

    fn fail(&mut self, reason: String) -> Option<TurntableEvent> {
        error!("{}", reason);
        match self.session.state {
            ConnectionState::Scanning => {
                if let Err(e) = self.transport.stop_scan() {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            ConnectionState::Connecting | ConnectionState::Discovering => {
                if let Err(e) = self.transport.disconnect() {
                    warn!("Transport disconnect failed: {}", e);
                }
            }
            _ => {}
        }
        self.reset_session();
        Some(TurntableEvent::ConnectionFailed(reason))
    }

    fn reset_session(&mut self) {
        if let Some(handle) = self.reset_timer.take() {
            self.scheduler.cancel(handle);
        }
        self.session = TurntableSession::default();
        self.session_epoch += 1;
    }

    fn ensure_ready(&self) -> Result<(), TurntableError> {
        if self.session.state != ConnectionState::Ready {
            return Err(TurntableError::NotReady(self.session.state));
        }
        Ok(())
    }

    fn write_rotate(&mut self, delta: u8) -> Result<(), TurntableError> {
        self.ensure_ready()?;
        let characteristic = self
            .session
            .write_characteristic
            .ok_or(TransportError::CharacteristicNotFound(self.profile.write_char_uuid))?;
        let frame = protocol::encode_rotate_command(delta);
        debug!("Rotate {}° -> {:02X?}", delta, frame);
        self.transport.write(characteristic, &frame)?;
        Ok(())
    }
}

impl Turntable for TurntableClient {
    fn is_ready(&self) -> bool {
        self.session.state == ConnectionState::Ready
    }

    fn current_angle(&self) -> u16 {
        self.session.current_angle
    }

    fn send_rotate_command(&mut self, delta: u8) -> Result<(), TurntableError> {
        self.write_rotate(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_plan_sums_to_zero_degree() {
        for angle in 0..FULL_TURN_DEGREES {
            let commands = plan_reset_rotation(angle);
            assert!(commands.len() <= 2);
            let total: u16 = commands.iter().map(|&d| d as u16).sum();
            assert_eq!(
                total % FULL_TURN_DEGREES,
                (FULL_TURN_DEGREES - angle) % FULL_TURN_DEGREES
            );
            assert!(commands.iter().all(|&d| d > 0));
        }
    }

    #[test]
    fn test_reset_plan_splits_past_one_byte() {
        assert_eq!(plan_reset_rotation(0), Vec::<u8>::new());
        assert_eq!(plan_reset_rotation(300), vec![60]);
        assert_eq!(plan_reset_rotation(105), vec![255]);
        assert_eq!(plan_reset_rotation(104), vec![255, 1]);
        assert_eq!(plan_reset_rotation(1), vec![255, 104]);
    }
}
