//! Bluetooth Module
//!
//! Drives the RFduino light meter over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      MeterService                        │
//! │  (Façade for polling clients, owns the driver lock)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - 10s scan│  │ - GATT     │  │ - UUIDs  │
//! │ - matching│  │   session  │  │ - Packets│
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       └──────┬───────┘
//!              ▼
//!     ┌─────────────────┐
//!     │  BleTransport   │  (platform: btleplug)
//!     └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, advertisement signature, packet and text formats
//! - [`scanner`] - Time-bounded meter discovery
//! - [`connection`] - GATT session state machine
//! - [`service`] - Façade and event pump
//! - [`transport`] - Transport trait the driver runs against
//! - [`platform`] - btleplug implementation of the transport

pub mod connection;
pub mod platform;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

pub use platform::BtleplugTransport;
pub use service::MeterService;
pub use transport::BleTransport;
