//! btleplug-backed transport.
//!
//! Each request is spawned as its own task on the runtime and reports back
//! through the driver event channel.

use crate::domain::models::{
    Advertisement, CharacteristicRef, DriverEvent, GattEvent, GattStatus, LinkId,
    PeripheralHandle,
};
use crate::infrastructure::bluetooth::protocol::MAX_WRITE_LEN;
use crate::infrastructure::bluetooth::transport::BleTransport;
use anyhow::Result;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct PlatformState {
    discovered: HashMap<String, Peripheral>,
    scan_task: Option<JoinHandle<()>>,
    /// Last `adapter.stop_scan()` request; the next scan waits for it.
    scan_stop: Option<JoinHandle<()>>,
    links: HashMap<LinkId, Link>,
}

struct Link {
    peripheral: Peripheral,
    task: JoinHandle<()>,
}

pub struct BtleplugTransport {
    adapter: Option<Adapter>,
    enabled: bool,
    runtime: Handle,
    events: mpsc::UnboundedSender<DriverEvent>,
    state: Arc<Mutex<PlatformState>>,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter. A host without one still gets a
    /// transport, which reports itself as unsupported.
    pub async fn new(events: mpsc::UnboundedSender<DriverEvent>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();
        let enabled = match &adapter {
            Some(adapter) => match adapter.adapter_info().await {
                Ok(info) => {
                    info!("Using Bluetooth adapter: {}", info);
                    true
                }
                Err(e) => {
                    warn!("Bluetooth adapter unavailable: {}", e);
                    false
                }
            },
            None => {
                warn!("No Bluetooth adapter found");
                false
            }
        };

        Ok(Self {
            adapter,
            enabled,
            runtime: Handle::current(),
            events,
            state: Arc::new(Mutex::new(PlatformState::default())),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PlatformState>> {
        self.state.lock().map_err(|_| anyhow::anyhow!("Lock error"))
    }

    fn adapter(&self) -> Result<Adapter> {
        self.adapter
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))
    }

    fn linked_peripheral(&self, link: LinkId) -> Result<Peripheral> {
        self.lock_state()?
            .links
            .get(&link)
            .map(|l| l.peripheral.clone())
            .ok_or_else(|| anyhow::anyhow!("{} is not connected", link))
    }

    fn send(&self, link: LinkId, event: GattEvent) {
        send_gatt(&self.events, link, event);
    }
}

fn send_gatt(events: &mpsc::UnboundedSender<DriverEvent>, link: LinkId, event: GattEvent) {
    let _ = events.send(DriverEvent::Gatt { link, event });
}

/// Spawn `task` so that it runs only after `previous` has finished.
fn spawn_after<F>(runtime: &Handle, previous: Option<JoinHandle<()>>, task: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    runtime.spawn(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        task.await;
    })
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| anyhow::anyhow!("Characteristic {} not found", uuid))
}

/// Flatten what btleplug exposes of an advertisement into one payload:
/// local name, then manufacturer data, then service data, each in key order.
pub fn advertisement_payload(
    local_name: Option<&str>,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    service_data: &HashMap<Uuid, Vec<u8>>,
) -> Vec<u8> {
    let mut payload = Vec::new();
    if let Some(name) = local_name {
        payload.extend_from_slice(name.as_bytes());
    }

    let mut manufacturers: Vec<_> = manufacturer_data.iter().collect();
    manufacturers.sort_by_key(|(id, _)| **id);
    for (_, data) in manufacturers {
        payload.extend_from_slice(data);
    }

    let mut services: Vec<_> = service_data.iter().collect();
    services.sort_by_key(|(uuid, _)| **uuid);
    for (_, data) in services {
        payload.extend_from_slice(data);
    }
    payload
}

impl BleTransport for BtleplugTransport {
    fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn start_scan(&self) -> Result<()> {
        let adapter = self.adapter()?;
        let events = self.events.clone();
        let state = self.state.clone();
        let pending_stop = self.lock_state()?.scan_stop.take();

        let task = spawn_after(&self.runtime, pending_stop, async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Could not subscribe to adapter events: {}", e);
                    return;
                }
            };
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("Could not start scan: {}", e);
                return;
            }

            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };

                let handle = PeripheralHandle {
                    id: peripheral.address().to_string(),
                    name: props.local_name.clone(),
                };
                if let Ok(mut state) = state.lock() {
                    state
                        .discovered
                        .insert(handle.id.clone(), peripheral.clone());
                }

                let payload = advertisement_payload(
                    props.local_name.as_deref(),
                    &props.manufacturer_data,
                    &props.service_data,
                );
                let _ = events.send(DriverEvent::Advertisement(Advertisement {
                    peripheral: handle,
                    payload,
                    rssi: props.rssi,
                }));
            }
        });

        if let Some(previous) = self.lock_state()?.scan_task.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_scan(&self) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        if let Some(task) = state.scan_task.take() {
            task.abort();
        }
        if let Some(adapter) = self.adapter.clone() {
            let previous = state.scan_stop.take();
            state.scan_stop = Some(spawn_after(&self.runtime, previous, async move {
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Could not stop scan: {}", e);
                }
            }));
        }
    }

    fn connect(&self, link: LinkId, peripheral: &PeripheralHandle) -> Result<()> {
        let adapter = self.adapter()?;
        let target = self
            .lock_state()?
            .discovered
            .get(&peripheral.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown peripheral {}", peripheral))?;

        let events = self.events.clone();
        let device = target.clone();
        let task = self.runtime.spawn(async move {
            // Subscribe first so a drop right after connecting is not missed.
            let stream = adapter.events().await;
            if let Err(e) = device.connect().await {
                send_gatt(
                    &events,
                    link,
                    GattEvent::Disconnected {
                        reason: e.to_string(),
                    },
                );
                return;
            }
            send_gatt(&events, link, GattEvent::Connected);

            let mut stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Disconnects on {} will go unnoticed: {}", link, e);
                    return;
                }
            };
            let id = device.id();
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        send_gatt(
                            &events,
                            link,
                            GattEvent::Disconnected {
                                reason: "link lost".to_string(),
                            },
                        );
                        return;
                    }
                }
            }
        });

        self.lock_state()?.links.insert(
            link,
            Link {
                peripheral: target,
                task,
            },
        );
        Ok(())
    }

    fn discover_services(&self, link: LinkId) -> Result<()> {
        let peripheral = self.linked_peripheral(link)?;
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => GattEvent::ServicesDiscovered {
                    status: GattStatus::SUCCESS,
                    characteristics: peripheral
                        .characteristics()
                        .into_iter()
                        .map(|c| CharacteristicRef {
                            uuid: c.uuid,
                            service: c.service_uuid,
                        })
                        .collect(),
                },
                Err(e) => {
                    warn!("Service discovery on {} failed: {}", link, e);
                    GattEvent::ServicesDiscovered {
                        status: GattStatus::FAILURE,
                        characteristics: Vec::new(),
                    }
                }
            };
            send_gatt(&events, link, event);
        });
        Ok(())
    }

    fn read_characteristic(&self, link: LinkId, characteristic: &CharacteristicRef) -> Result<()> {
        let peripheral = self.linked_peripheral(link)?;
        let target = find_characteristic(&peripheral, characteristic.uuid)?;
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let (status, value) = match peripheral.read(&target).await {
                Ok(value) => (GattStatus::SUCCESS, value),
                Err(e) => {
                    debug!("Read of {} failed: {}", target.uuid, e);
                    (GattStatus::FAILURE, Vec::new())
                }
            };
            send_gatt(
                &events,
                link,
                GattEvent::CharacteristicRead {
                    characteristic: target.uuid,
                    status,
                    value,
                },
            );
        });
        Ok(())
    }

    fn set_value(&self, characteristic: &CharacteristicRef, value: &[u8]) -> Result<()> {
        if value.len() > MAX_WRITE_LEN {
            anyhow::bail!(
                "{} bytes do not fit characteristic {} (max {})",
                value.len(),
                characteristic.uuid,
                MAX_WRITE_LEN
            );
        }
        Ok(())
    }

    fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> Result<()> {
        let peripheral = self.linked_peripheral(link)?;
        let target = find_characteristic(&peripheral, characteristic.uuid)?;
        let value = value.to_vec();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let status = match peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
            {
                Ok(()) => GattStatus::SUCCESS,
                Err(e) => {
                    debug!("Write of {} failed: {}", target.uuid, e);
                    GattStatus::FAILURE
                }
            };
            send_gatt(
                &events,
                link,
                GattEvent::CharacteristicWrite {
                    characteristic: target.uuid,
                    status,
                },
            );
        });
        Ok(())
    }

    fn disconnect(&self, link: LinkId) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        let Some(Link { peripheral, task }) = state.links.remove(&link) else {
            return;
        };
        task.abort();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect of {} reported: {}", link, e);
            }
        });
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(task) = state.scan_task.take() {
                task.abort();
            }
            for (_, link) in state.links.drain() {
                link.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_concatenation_order() {
        let mut manufacturer = HashMap::new();
        manufacturer.insert(0x0002, b"Meter".to_vec());
        manufacturer.insert(0x0001, b"BlueLight".to_vec());
        let mut service = HashMap::new();
        service.insert(Uuid::from_u128(1), vec![0xff]);

        let payload = advertisement_payload(Some("RFduino"), &manufacturer, &service);
        assert_eq!(&payload[..], b"RFduinoBlueLightMeter\xff");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_restart_waits_for_stop() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        let stop = Handle::current().spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            log.lock().unwrap().push("stop");
        });
        let log = order.clone();
        let start = spawn_after(&Handle::current(), Some(stop), async move {
            log.lock().unwrap().push("start");
        });

        start.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["stop", "start"]);
    }

    #[test]
    fn test_payload_without_name() {
        let payload = advertisement_payload(None, &HashMap::new(), &HashMap::new());
        assert!(payload.is_empty());
    }
}
