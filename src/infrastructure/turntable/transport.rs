//! BLE transport port
//!
//! Calls only start an operation; completion comes back through
//! [`TransportEvent`]s on the controller queue.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("{0}")]
    Backend(String),
}

/// Platform address of a peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub String);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProps {
    pub write: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub props: CharacteristicProps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DeviceDiscovered {
        name: Option<String>,
        address: DeviceAddress,
    },
    ScanFailed(String),
    Connected,
    ConnectFailed(String),
    ServicesDiscovered(Vec<GattService>),
    ServiceDiscoveryFailed(String),
    NotificationsEnabled(Uuid),
    NotificationsFailed {
        characteristic: Uuid,
        reason: String,
    },
    ValueNotified {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    WriteCompleted {
        characteristic: Uuid,
        result: Result<(), String>,
    },
    Disconnected,
}

/// Radio-level operations the turntable client relies on
pub trait BleTransport: Send {
    /// Scan for peripherals advertising `service`
    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError>;
    fn stop_scan(&mut self) -> Result<(), TransportError>;
    fn connect(&mut self, address: &DeviceAddress) -> Result<(), TransportError>;
    fn discover_services(&mut self) -> Result<(), TransportError>;
    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), TransportError>;
    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
}
