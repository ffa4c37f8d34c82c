//! GATT Session Module
//!
//! Connection lifecycle of the one meter: connect, service discovery,
//! characteristic resolution, the read pump and the write pump.

use crate::domain::models::{
    CharacteristicRef, GattEvent, GattStatus, LinkId, Mode, PeripheralHandle,
};
use crate::domain::status::StatusBus;
use crate::error::DriverError;
use crate::infrastructure::bluetooth::protocol::{self, READ_CHAR_UUID, WRITE_CHAR_UUID};
use crate::infrastructure::bluetooth::transport::BleTransport;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    ServicesDiscovering,
    Ready,
}

/// GATT connection to the meter.
///
/// Characteristic references exist only in `Ready`. The peripheral handle
/// survives `close()` so the next `connect` can skip scanning.
#[derive(Debug, Default)]
pub struct GattSession {
    state: SessionState,
    link: Option<LinkId>,
    next_link: u64,
    peripheral: Option<PeripheralHandle>,
    read_char: Option<CharacteristicRef>,
    write_char: Option<CharacteristicRef>,
    read_value: Vec<u8>,
    write_value: Option<Vec<u8>>,
    pending_write: bool,
    read_in_flight: bool,
}

impl GattSession {
    /// Create a session with nothing connected or cached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Epoch of the held connection, if any.
    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// True while a transport connection is held, resolved or not.
    pub fn has_connection(&self) -> bool {
        self.link.is_some()
    }

    /// Last peripheral connected to, kept across `close()`.
    pub fn cached_peripheral(&self) -> Option<&PeripheralHandle> {
        self.peripheral.as_ref()
    }

    /// True while a write waits behind an in-flight read.
    pub fn pending_write(&self) -> bool {
        self.pending_write
    }

    /// True between a read request and its completion.
    pub fn read_in_flight(&self) -> bool {
        self.read_in_flight
    }

    /// Both meter characteristics are known.
    pub fn characteristics_resolved(&self) -> bool {
        self.read_char.is_some() && self.write_char.is_some()
    }

    /// Open a connection to `peripheral`, caching it for later reconnects.
    pub fn connect(
        &mut self,
        peripheral: PeripheralHandle,
        transport: &dyn BleTransport,
        bus: &mut StatusBus,
    ) {
        self.close(transport);

        self.next_link += 1;
        let link = LinkId(self.next_link);
        info!("Connecting to {} on {}", peripheral, link);

        let result = transport.connect(link, &peripheral);
        self.peripheral = Some(peripheral);
        match result {
            Ok(()) => {
                self.link = Some(link);
                self.state = SessionState::Connecting;
            }
            Err(e) => bus.fault(&DriverError::UnexpectedDisconnect(format!(
                "connect failed: {}",
                e
            ))),
        }
    }

    /// Release the connection and forget the characteristics.
    pub fn close(&mut self, transport: &dyn BleTransport) {
        if let Some(link) = self.link.take() {
            info!("Disconnecting Gatt ({})", link);
            transport.disconnect(link);
        }
        self.invalidate();
    }

    /// Apply one completion event from the transport.
    pub fn handle_event(
        &mut self,
        link: LinkId,
        event: GattEvent,
        transport: &dyn BleTransport,
        bus: &mut StatusBus,
    ) {
        if self.link != Some(link) {
            warn!("Ignoring {:?} from released {}", event, link);
            return;
        }

        match event {
            GattEvent::Connected => {
                info!("Connected to GATT server");
                bus.set_status("BLM connected");
                self.state = SessionState::ServicesDiscovering;
                if let Err(e) = transport.discover_services(link) {
                    warn!("Service discovery request rejected: {}", e);
                    self.invalidate();
                    bus.fault(&DriverError::ServiceDiscoveryFailed {
                        status: GattStatus::FAILURE,
                    });
                }
            }
            GattEvent::Disconnected { reason } => {
                self.link = None;
                transport.disconnect(link);
                self.invalidate();
                bus.fault(&DriverError::UnexpectedDisconnect(reason));
            }
            GattEvent::ServicesDiscovered {
                status,
                characteristics,
            } => self.on_services_discovered(status, &characteristics, transport, bus),
            GattEvent::CharacteristicRead {
                characteristic,
                status,
                value,
            } => {
                self.read_in_flight = false;
                if characteristic != READ_CHAR_UUID {
                    debug!("Read completion for unrelated characteristic {}", characteristic);
                } else if status.is_success() {
                    debug!("Read value: {:02X?}", value);
                    self.read_value = value;
                } else {
                    bus.fault(&DriverError::CharacteristicOperationFailed(format!(
                        "characteristic read failed with status {}",
                        status
                    )));
                }
                if self.pending_write {
                    self.pending_write = false;
                    if let Err(e) = self.submit_write(transport) {
                        bus.fault(&e);
                    }
                }
            }
            GattEvent::CharacteristicWrite {
                characteristic,
                status,
            } => {
                info!("Characteristic {} write completed: {}", characteristic, status);
            }
        }
    }

    fn on_services_discovered(
        &mut self,
        status: GattStatus,
        characteristics: &[CharacteristicRef],
        transport: &dyn BleTransport,
        bus: &mut StatusBus,
    ) {
        info!("Services discovered: {}", status);
        if !status.is_success() {
            self.invalidate();
            bus.fault(&DriverError::ServiceDiscoveryFailed { status });
            return;
        }

        for c in characteristics {
            debug!("Characteristic {} (service {})", c.uuid, c.service);
        }
        let read = characteristics.iter().find(|c| c.uuid == READ_CHAR_UUID);
        let write = characteristics.iter().find(|c| c.uuid == WRITE_CHAR_UUID);

        match (read, write) {
            (Some(read), Some(write)) => {
                info!("Resolved meter characteristics in service {}", write.service);
                self.read_char = Some(*read);
                self.write_char = Some(*write);
                self.state = SessionState::Ready;
                bus.set_mode(Mode::BlmConnected);
                self.issue_read(transport, bus);
            }
            _ => {
                self.invalidate();
                bus.fault(&DriverError::CharacteristicsMissing);
            }
        }
    }

    /// Formatted last value. Also keeps the read pump going while connected.
    pub fn value(&mut self, transport: &dyn BleTransport, bus: &mut StatusBus) -> String {
        if self.read_char.is_none() {
            return "nodata:".to_string();
        }
        let formatted = protocol::format_value(&self.read_value);
        if self.state == SessionState::Ready && !self.read_in_flight {
            self.issue_read(transport, bus);
        }
        formatted
    }

    /// Stage `value` for the write characteristic.
    ///
    /// The write goes out right away when no read is in flight, otherwise
    /// after the next read completion.
    pub fn set_parameters(
        &mut self,
        value: Vec<u8>,
        transport: &dyn BleTransport,
    ) -> Result<(), DriverError> {
        let write_char = self.write_char.ok_or_else(|| {
            DriverError::CharacteristicOperationFailed("write characteristic not resolved".into())
        })?;
        transport.set_value(&write_char, &value).map_err(|e| {
            DriverError::CharacteristicOperationFailed(format!(
                "write characteristic set value failed: {}",
                e
            ))
        })?;

        self.write_value = Some(value);
        self.pending_write = true;
        if !self.read_in_flight {
            self.pending_write = false;
            self.submit_write(transport)?;
        }
        Ok(())
    }

    fn issue_read(&mut self, transport: &dyn BleTransport, bus: &mut StatusBus) {
        let (Some(link), Some(read_char)) = (self.link, self.read_char) else {
            return;
        };
        match transport.read_characteristic(link, &read_char) {
            Ok(()) => self.read_in_flight = true,
            Err(e) => bus.fault(&DriverError::CharacteristicOperationFailed(format!(
                "read characteristic request failed: {}",
                e
            ))),
        }
    }

    fn submit_write(&mut self, transport: &dyn BleTransport) -> Result<(), DriverError> {
        let (Some(link), Some(write_char), Some(value)) =
            (self.link, self.write_char, self.write_value.as_ref())
        else {
            return Err(DriverError::CharacteristicOperationFailed(
                "write characteristic write failed: not connected".into(),
            ));
        };
        transport
            .write_characteristic(link, &write_char, value)
            .map_err(|e| {
                DriverError::CharacteristicOperationFailed(format!(
                    "write characteristic write failed: {}",
                    e
                ))
            })
    }

    /// Drop everything resolved on the current link. The link itself may
    /// still be held at transport level until `close()`.
    fn invalidate(&mut self) {
        self.state = SessionState::Disconnected;
        self.read_char = None;
        self.write_char = None;
        self.read_value.clear();
        self.write_value = None;
        self.pending_write = false;
        self.read_in_flight = false;
    }
}
