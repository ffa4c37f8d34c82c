//! BLE transport seam.
//!
//! Every operation only submits a request and returns; completions arrive
//! later as [`DriverEvent`](crate::domain::models::DriverEvent)s on the
//! channel the transport was built with. Implementations must never call
//! back into the driver synchronously.

use crate::domain::models::{CharacteristicRef, LinkId, PeripheralHandle};
use anyhow::Result;

pub trait BleTransport: Send + Sync {
    /// Whether the host has BLE at all.
    fn is_supported(&self) -> bool;

    /// Whether the adapter is present and switched on.
    fn is_enabled(&self) -> bool;

    /// Start delivering `DriverEvent::Advertisement`s.
    fn start_scan(&self) -> Result<()>;

    fn stop_scan(&self);

    /// Request a connection; completes with `Connected` or `Disconnected`.
    fn connect(&self, link: LinkId, peripheral: &PeripheralHandle) -> Result<()>;

    /// Completes with `ServicesDiscovered`.
    fn discover_services(&self, link: LinkId) -> Result<()>;

    /// Completes with `CharacteristicRead`.
    fn read_characteristic(&self, link: LinkId, characteristic: &CharacteristicRef) -> Result<()>;

    /// Check that `value` can be assigned to the characteristic.
    fn set_value(&self, characteristic: &CharacteristicRef, value: &[u8]) -> Result<()>;

    /// Completes with `CharacteristicWrite`.
    fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> Result<()>;

    /// Release the connection. No further events are expected for `link`.
    fn disconnect(&self, link: LinkId);
}
