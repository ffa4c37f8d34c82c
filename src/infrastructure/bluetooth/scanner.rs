//! BLE Scanner Module
//!
//! Time-bounded discovery of the light meter.

use crate::domain::models::{Advertisement, PeripheralHandle};
use crate::error::DriverError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::BleTransport;
use tracing::{debug, info, warn};

/// Scans for the meter and yields at most one match per scan.
#[derive(Debug, Default)]
pub struct DeviceLocator {
    scanning: bool,
    generation: u64,
}

impl DeviceLocator {
    /// Create an idle locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start scanning.
    ///
    /// Returns the generation to arm the timeout with, or `None` when a scan
    /// is already running.
    pub fn start(&mut self, transport: &dyn BleTransport) -> Result<Option<u64>, DriverError> {
        if self.scanning {
            return Ok(None);
        }
        info!("Starting Scan");
        transport
            .start_scan()
            .map_err(|e| DriverError::AdapterUnavailable(format!("scan failed: {}", e)))?;
        self.scanning = true;
        self.generation += 1;
        Ok(Some(self.generation))
    }

    /// Stop scanning. Safe to call when not scanning.
    pub fn stop(&mut self, transport: &dyn BleTransport) {
        if self.scanning {
            info!("Stopping Scan");
            self.scanning = false;
            transport.stop_scan();
        }
    }

    /// Whether a scan is currently running.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Check one advertisement.
    ///
    /// `already_found` is true once a peripheral has been handed over, so
    /// later matches are ignored. Advertisements still queued after the scan
    /// ended are ignored too. On a match the scan is stopped.
    pub fn on_advertisement(
        &mut self,
        advertisement: &Advertisement,
        already_found: bool,
        transport: &dyn BleTransport,
    ) -> Option<PeripheralHandle> {
        let decoded = protocol::decode_payload(&advertisement.payload);
        debug!(
            "Found Device {} (rssi {:?}): {}",
            advertisement.peripheral, advertisement.rssi, decoded
        );
        if !self.scanning || already_found || !protocol::matches_signature(&decoded) {
            return None;
        }
        info!("Stopping Scan because found");
        self.stop(transport);
        Some(advertisement.peripheral.clone())
    }

    /// Handle the scan timer.
    ///
    /// Returns true when `generation` belongs to a scan that is still
    /// running, which is then stopped. Timers of earlier scans, and of a scan
    /// already ended by a match or `stop`, are ignored.
    pub fn on_timeout(&mut self, generation: u64, transport: &dyn BleTransport) -> bool {
        if generation != self.generation {
            warn!("Ignoring stale scan timeout (generation {})", generation);
            return false;
        }
        if !self.scanning {
            debug!("Scan timeout after scan ended");
            return false;
        }
        info!("Scan Timeout");
        self.stop(transport);
        true
    }
}
