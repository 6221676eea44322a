//! Real radio backend built on btleplug.
//!
//! Each port call spawns the matching async btleplug operation and reports
//! its completion on the controller queue.

use crate::domain::models::RigEvent;
use crate::infrastructure::turntable::transport::{
    BleTransport, CharacteristicProps, DeviceAddress, GattCharacteristic, GattService,
    TransportError, TransportEvent,
};
use btleplug::api::{
    CentralEvent, CharPropFlags, Characteristic, Central, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Shared<T> = Arc<Mutex<T>>;

pub struct BtleplugTransport {
    runtime: Handle,
    tx: mpsc::UnboundedSender<RigEvent>,
    adapter: Adapter,
    seen: Shared<HashMap<String, Peripheral>>,
    current: Shared<Option<Peripheral>>,
    central_task: JoinHandle<()>,
    notify_task: Option<JoinHandle<()>>,
}

fn send(tx: &mpsc::UnboundedSender<RigEvent>, event: TransportEvent) {
    if tx.send(RigEvent::Transport(event)).is_err() {
        debug!("Controller gone, dropping transport event");
    }
}

fn backend<E: std::fmt::Display>(e: E) -> TransportError {
    TransportError::Backend(e.to_string())
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter and start watching its events
    pub async fn new(tx: mpsc::UnboundedSender<RigEvent>) -> anyhow::Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapters found"))?;
        info!("Using Bluetooth adapter {}", adapter.adapter_info().await?);

        let seen: Shared<HashMap<String, Peripheral>> = Arc::new(Mutex::new(HashMap::new()));
        let current: Shared<Option<Peripheral>> = Arc::new(Mutex::new(None));
        let central_task = tokio::spawn(Self::watch_central(
            adapter.clone(),
            tx.clone(),
            Arc::clone(&seen),
            Arc::clone(&current),
        ));

        Ok(Self {
            runtime: Handle::current(),
            tx,
            adapter,
            seen,
            current,
            central_task,
            notify_task: None,
        })
    }

    async fn watch_central(
        adapter: Adapter,
        tx: mpsc::UnboundedSender<RigEvent>,
        seen: Shared<HashMap<String, Peripheral>>,
        current: Shared<Option<Peripheral>>,
    ) {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                send(&tx, TransportEvent::ScanFailed(e.to_string()));
                return;
            }
        };

        while let Some(event) = events.next().await {
            match event {
                CentralEvent::DeviceDiscovered(id) => {
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    let Ok(Some(properties)) = peripheral.properties().await else {
                        continue;
                    };
                    let address = properties.address.to_string();
                    if let Ok(mut seen) = seen.lock() {
                        seen.insert(address.clone(), peripheral);
                    }
                    send(
                        &tx,
                        TransportEvent::DeviceDiscovered {
                            name: properties.local_name,
                            address: DeviceAddress(address),
                        },
                    );
                }
                CentralEvent::DeviceDisconnected(id) => {
                    let ours = current
                        .lock()
                        .map(|mut current| {
                            let matches = current.as_ref().is_some_and(|p| p.id() == id);
                            if matches {
                                *current = None;
                            }
                            matches
                        })
                        .unwrap_or(false);
                    if ours {
                        warn!("Peripheral {:?} disconnected", id);
                        send(&tx, TransportEvent::Disconnected);
                    }
                }
                _ => {}
            }
        }
    }

    fn connected_peripheral(&self) -> Result<Peripheral, TransportError> {
        self.current
            .lock()
            .map_err(backend)?
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn characteristic(&self, uuid: Uuid) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.connected_peripheral()?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))?;
        Ok((peripheral, characteristic))
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.central_task.abort();
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

impl BleTransport for BtleplugTransport {
    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        let adapter = self.adapter.clone();
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let filter = ScanFilter {
                services: vec![service],
            };
            if let Err(e) = adapter.start_scan(filter).await {
                send(&tx, TransportEvent::ScanFailed(e.to_string()));
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("stop_scan failed: {}", e);
            }
        });
        Ok(())
    }

    fn connect(&mut self, address: &DeviceAddress) -> Result<(), TransportError> {
        let peripheral = self
            .seen
            .lock()
            .map_err(backend)?
            .get(&address.0)
            .cloned()
            .ok_or_else(|| TransportError::Backend(format!("unknown device {}", address)))?;

        let tx = self.tx.clone();
        let current = Arc::clone(&self.current);
        self.runtime.spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    if let Ok(mut current) = current.lock() {
                        *current = Some(peripheral);
                    }
                    send(&tx, TransportEvent::Connected);
                }
                Err(e) => send(&tx, TransportEvent::ConnectFailed(e.to_string())),
            }
        });
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        let peripheral = self.connected_peripheral()?;
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                send(&tx, TransportEvent::ServiceDiscoveryFailed(e.to_string()));
                return;
            }
            let services = peripheral
                .services()
                .into_iter()
                .map(|service| GattService {
                    uuid: service.uuid,
                    characteristics: service
                        .characteristics
                        .into_iter()
                        .map(|c| GattCharacteristic {
                            uuid: c.uuid,
                            props: CharacteristicProps {
                                write: c.properties.intersects(
                                    CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
                                ),
                                notify: c.properties.contains(CharPropFlags::NOTIFY),
                            },
                        })
                        .collect(),
                })
                .collect();
            send(&tx, TransportEvent::ServicesDiscovered(services));
        });
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), TransportError> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        let tx = self.tx.clone();

        if !enabled {
            if let Some(task) = self.notify_task.take() {
                task.abort();
            }
            self.runtime.spawn(async move {
                if let Err(e) = peripheral.unsubscribe(&target).await {
                    debug!("unsubscribe failed: {}", e);
                }
            });
            return Ok(());
        }

        let forward = async move {
            if let Err(e) = peripheral.subscribe(&target).await {
                send(
                    &tx,
                    TransportEvent::NotificationsFailed {
                        characteristic,
                        reason: e.to_string(),
                    },
                );
                return;
            }
            let mut stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    send(
                        &tx,
                        TransportEvent::NotificationsFailed {
                            characteristic,
                            reason: e.to_string(),
                        },
                    );
                    return;
                }
            };
            send(&tx, TransportEvent::NotificationsEnabled(characteristic));

            while let Some(notification) = stream.next().await {
                send(
                    &tx,
                    TransportEvent::ValueNotified {
                        characteristic: notification.uuid,
                        value: notification.value,
                    },
                );
            }
            debug!("Notification stream ended");
        };

        if let Some(task) = self.notify_task.replace(self.runtime.spawn(forward)) {
            task.abort();
        }
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        let tx = self.tx.clone();
        let value = value.to_vec();
        self.runtime.spawn(async move {
            let result = peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
                .map_err(|e| e.to_string());
            send(
                &tx,
                TransportEvent::WriteCompleted {
                    characteristic,
                    result,
                },
            );
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        let Some(peripheral) = self.current.lock().map_err(backend)?.take() else {
            return Ok(());
        };
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("disconnect failed: {}", e);
            }
            send(&tx, TransportEvent::Disconnected);
        });
        Ok(())
    }
}
