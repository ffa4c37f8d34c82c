use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Which data source the service answers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Unknown,
    BlmConnected,
    Error,
}

impl Mode {
    /// Numeric code exposed to polling clients (0, 1, 2).
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::BlmConnected => 1,
            Self::Error => 2,
        }
    }
}

/// A discovered peripheral, cached for fast reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    /// Transport-specific identifier (the Bluetooth address on most platforms).
    pub id: String,
    pub name: Option<String>,
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A resolved GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicRef {
    pub uuid: Uuid,
    pub service: Uuid,
}

/// One received advertisement: identifier plus raw payload bytes.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub peripheral: PeripheralHandle,
    pub payload: Vec<u8>,
    pub rssi: Option<i16>,
}

/// GATT completion status code; 0 is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);
    pub const FAILURE: GattStatus = GattStatus(0x101);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection epoch. Every `connect` gets a fresh one so completions from a
/// released connection can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Completion events of a GATT connection.
#[derive(Debug, Clone)]
pub enum GattEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    ServicesDiscovered {
        status: GattStatus,
        characteristics: Vec<CharacteristicRef>,
    },
    CharacteristicRead {
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    CharacteristicWrite {
        characteristic: Uuid,
        status: GattStatus,
    },
}

/// Everything the driver state machine reacts to.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Advertisement(Advertisement),
    Gatt { link: LinkId, event: GattEvent },
    ScanTimeout { generation: u64 },
}

/// Consistent view of the service, taken under a single lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub mode: Mode,
    pub status: String,
    pub data: String,
    pub lux: f32,
    pub characteristics_resolved: bool,
}
