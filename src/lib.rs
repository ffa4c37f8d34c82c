//! Driver for the RFduino Blue Light Meter.
//!
//! Finds the meter over BLE, keeps a GATT session to it, pushes sensor
//! configuration and answers polling clients, falling back to the host's
//! ambient light sensor when no meter is around.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{MeterSnapshot, Mode};
pub use error::{DriverError, ParameterError};
pub use infrastructure::bluetooth::MeterService;
