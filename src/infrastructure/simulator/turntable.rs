//! Simulated Matterport Axis
//!
//! Answers the same GATT conversation as the real table and turns 1° per
//! tick, notifying each step. At rest it keeps reporting the current angle
//! periodically, like the hardware does.

use crate::domain::models::RigEvent;
use crate::infrastructure::turntable::protocol::{
    self, DEVICE_NAME, FULL_TURN_DEGREES, NOTIFY_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID,
};
use crate::infrastructure::turntable::transport::{
    BleTransport, CharacteristicProps, DeviceAddress, GattCharacteristic, GattService,
    TransportError, TransportEvent,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SimulatedAxisConfig {
    pub device_name: String,
    pub address: DeviceAddress,
    pub degrees_per_tick: u16,
    pub tick: Duration,
    pub idle_notify_interval: Duration,
    /// Delay before scan/connect/discovery results are reported
    pub link_latency: Duration,
}

impl Default for SimulatedAxisConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            address: DeviceAddress("AA:BB:CC:00:FF:E0".to_string()),
            degrees_per_tick: 1,
            tick: Duration::from_millis(10),
            idle_notify_interval: Duration::from_millis(250),
            link_latency: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Default)]
struct AxisState {
    angle: u16,
    remaining: u32,
    connected: bool,
    subscribed: bool,
    commands: Vec<u8>,
}

/// Observation and fault injection for a running simulated axis
#[derive(Clone)]
pub struct AxisHandle {
    state: Arc<Mutex<AxisState>>,
    tx: mpsc::UnboundedSender<RigEvent>,
}

impl AxisHandle {
    fn lock(&self) -> MutexGuard<'_, AxisState> {
        // Nothing panics while holding the lock
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn angle(&self) -> u16 {
        self.lock().angle
    }

    pub fn is_moving(&self) -> bool {
        self.lock().remaining > 0
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Rotate deltas received so far, in order
    pub fn commands(&self) -> Vec<u8> {
        self.lock().commands.clone()
    }

    /// Simulate the table powering off or walking out of range
    pub fn drop_link(&self) {
        {
            let mut state = self.lock();
            state.connected = false;
            state.subscribed = false;
            state.remaining = 0;
        }
        warn!("Simulated axis dropped the link");
        let _ = self.tx.send(RigEvent::Transport(TransportEvent::Disconnected));
    }
}

pub struct SimulatedTurntable {
    config: SimulatedAxisConfig,
    handle: AxisHandle,
    runtime: Handle,
    ticker: Option<JoinHandle<()>>,
}

impl SimulatedTurntable {
    /// Must be called from inside a tokio runtime
    pub fn new(config: SimulatedAxisConfig, tx: mpsc::UnboundedSender<RigEvent>) -> Self {
        Self {
            config,
            handle: AxisHandle {
                state: Arc::new(Mutex::new(AxisState::default())),
                tx,
            },
            runtime: Handle::current(),
            ticker: None,
        }
    }

    pub fn handle(&self) -> AxisHandle {
        self.handle.clone()
    }

    fn emit(&self, events: Vec<TransportEvent>) {
        let tx = self.handle.tx.clone();
        let latency = self.config.link_latency;
        if latency.is_zero() {
            for event in events {
                let _ = tx.send(RigEvent::Transport(event));
            }
            return;
        }
        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            for event in events {
                let _ = tx.send(RigEvent::Transport(event));
            }
        });
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if !self.handle.lock().connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        let handle = self.handle.clone();
        let tick = self.config.tick;
        let per_tick = self.config.degrees_per_tick.max(1);
        let idle_ticks = (self.config.idle_notify_interval.as_millis()
            / tick.as_millis().max(1))
        .max(1) as u32;

        self.ticker = Some(self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut idle = 0u32;
            loop {
                interval.tick().await;
                let angle = {
                    let mut state = handle.lock();
                    if !state.connected || !state.subscribed {
                        break;
                    }
                    if state.remaining > 0 {
                        let step = (per_tick as u32).min(state.remaining);
                        state.remaining -= step;
                        state.angle = (state.angle + step as u16) % FULL_TURN_DEGREES;
                        idle = 0;
                        Some(state.angle)
                    } else {
                        idle += 1;
                        if idle >= idle_ticks {
                            idle = 0;
                            Some(state.angle)
                        } else {
                            None
                        }
                    }
                };
                if let Some(angle) = angle {
                    let event = TransportEvent::ValueNotified {
                        characteristic: NOTIFY_CHAR_UUID,
                        value: protocol::encode_angle_notification(angle).to_vec(),
                    };
                    if handle.tx.send(RigEvent::Transport(event)).is_err() {
                        break;
                    }
                }
            }
            debug!("Simulated axis ticker stopped");
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for SimulatedTurntable {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

impl BleTransport for SimulatedTurntable {
    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        debug!("Simulated scan for {}", service);
        let mut events = vec![TransportEvent::DeviceDiscovered {
            name: None,
            address: DeviceAddress("11:22:33:44:55:66".to_string()),
        }];
        if service == SERVICE_UUID {
            events.push(TransportEvent::DeviceDiscovered {
                name: Some(self.config.device_name.clone()),
                address: self.config.address.clone(),
            });
        }
        self.emit(events);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connect(&mut self, address: &DeviceAddress) -> Result<(), TransportError> {
        if *address != self.config.address {
            self.emit(vec![TransportEvent::ConnectFailed(format!(
                "no device at {}",
                address
            ))]);
            return Ok(());
        }
        self.handle.lock().connected = true;
        info!("Simulated axis connected at {}", address);
        self.emit(vec![TransportEvent::Connected]);
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        self.require_connected()?;
        let service = GattService {
            uuid: SERVICE_UUID,
            characteristics: vec![
                GattCharacteristic {
                    uuid: WRITE_CHAR_UUID,
                    props: CharacteristicProps {
                        write: true,
                        notify: false,
                    },
                },
                GattCharacteristic {
                    uuid: NOTIFY_CHAR_UUID,
                    props: CharacteristicProps {
                        write: false,
                        notify: true,
                    },
                },
            ],
        };
        self.emit(vec![TransportEvent::ServicesDiscovered(vec![service])]);
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), TransportError> {
        self.require_connected()?;
        if characteristic != NOTIFY_CHAR_UUID {
            self.emit(vec![TransportEvent::NotificationsFailed {
                characteristic,
                reason: "characteristic does not support notify".to_string(),
            }]);
            return Ok(());
        }

        self.handle.lock().subscribed = enabled;
        if enabled {
            self.start_ticker();
            self.emit(vec![TransportEvent::NotificationsEnabled(characteristic)]);
        } else {
            self.stop_ticker();
        }
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        self.require_connected()?;
        if characteristic != WRITE_CHAR_UUID {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        let delta =
            protocol::decode_rotate_command(value).map_err(|e| TransportError::Backend(e.to_string()))?;
        {
            let mut state = self.handle.lock();
            state.remaining += delta as u32;
            state.commands.push(delta);
        }
        debug!("Simulated axis rotating {}°", delta);
        self.emit(vec![TransportEvent::WriteCompleted {
            characteristic,
            result: Ok(()),
        }]);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_ticker();
        let was_connected = {
            let mut state = self.handle.lock();
            let was = state.connected;
            state.connected = false;
            state.subscribed = false;
            was
        };
        if was_connected {
            self.emit(vec![TransportEvent::Disconnected]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_config() -> SimulatedAxisConfig {
        SimulatedAxisConfig {
            link_latency: Duration::ZERO,
            tick: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn next_transport(rx: &mut mpsc::UnboundedReceiver<RigEvent>) -> TransportEvent {
        match rx.try_recv() {
            Ok(RigEvent::Transport(event)) => event,
            other => panic!("expected transport event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_reports_axis_by_name() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut axis = SimulatedTurntable::new(instant_config(), tx);

        axis.start_scan(SERVICE_UUID).unwrap();
        assert!(matches!(
            next_transport(&mut rx),
            TransportEvent::DeviceDiscovered { name: None, .. }
        ));
        match next_transport(&mut rx) {
            TransportEvent::DeviceDiscovered { name, .. } => {
                assert_eq!(name.as_deref(), Some(DEVICE_NAME))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_requires_link() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut axis = SimulatedTurntable::new(instant_config(), tx);
        let frame = protocol::encode_rotate_command(30);
        assert_eq!(
            axis.write(WRITE_CHAR_UUID, &frame),
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_rotation_notifies_each_degree() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = instant_config();
        let address = config.address.clone();
        let mut axis = SimulatedTurntable::new(config, tx);
        let handle = axis.handle();

        axis.connect(&address).unwrap();
        axis.set_notify(NOTIFY_CHAR_UUID, true).unwrap();
        axis.write(WRITE_CHAR_UUID, &protocol::encode_rotate_command(3))
            .unwrap();

        let mut angles = Vec::new();
        while angles.len() < 3 {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("axis should notify")
                .expect("channel open");
            if let RigEvent::Transport(TransportEvent::ValueNotified { value, .. }) = event {
                angles.push(protocol::decode_angle_notification(&value).unwrap());
            }
        }
        assert_eq!(angles, vec![1, 2, 3]);
        assert_eq!(handle.commands(), vec![3]);
        assert!(!handle.is_moving());
    }
}
