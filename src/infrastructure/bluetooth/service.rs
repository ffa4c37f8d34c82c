//! Meter Service Module
//!
//! Façade the polling client talks to. Coordinates scanning, the GATT
//! session and the ambient light fallback, and decides per poll which
//! source answers.

use crate::domain::models::{DriverEvent, MeterSnapshot, Mode, PeripheralHandle};
use crate::domain::sensor::{format_lux, AmbientLightSensor, SensorFallback};
use crate::domain::status::StatusBus;
use crate::error::DriverError;
use crate::infrastructure::bluetooth::{
    connection::GattSession,
    protocol::{self, MeterConfig, SCAN_PERIOD},
    scanner::DeviceLocator,
    transport::BleTransport,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything mutable, guarded by one lock.
struct DriverState {
    bus: StatusBus,
    locator: DeviceLocator,
    session: GattSession,
    fallback: SensorFallback,
}

struct Inner {
    state: Mutex<DriverState>,
    transport: Arc<dyn BleTransport>,
    events: mpsc::UnboundedSender<DriverEvent>,
    runtime: Handle,
}

/// Light meter driver.
///
/// Cheap to clone; every accessor can be called from any thread and returns
/// the best cached value without waiting on the radio.
#[derive(Clone)]
pub struct MeterService {
    inner: Arc<Inner>,
}

impl MeterService {
    /// Create the service.
    ///
    /// `events` must be the sender the transport posts completions to; the
    /// scan timer posts on it too. `runtime` runs the scan timer.
    pub fn new(
        transport: Arc<dyn BleTransport>,
        light_sensor: Option<Arc<dyn AmbientLightSensor>>,
        events: mpsc::UnboundedSender<DriverEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DriverState {
                    bus: StatusBus::default(),
                    locator: DeviceLocator::new(),
                    session: GattSession::new(),
                    fallback: SensorFallback::new(light_sensor),
                }),
                transport,
                events,
                runtime,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start both data sources: the light sensor and the meter (cached
    /// reconnect, or a fresh scan).
    pub fn init(&self) {
        info!("Init");
        let transport = self.inner.transport.as_ref();
        let mut guard = self.lock();
        let state = &mut *guard;

        state.fallback.init();

        if let Some(peripheral) = state.session.cached_peripheral().cloned() {
            info!("Device Cached");
            Self::connect(state, peripheral, transport);
            return;
        }

        if !transport.is_supported() {
            state.bus.fault(&DriverError::AdapterUnavailable(
                "BLE not available".to_string(),
            ));
            return;
        }
        if !transport.is_enabled() {
            state.bus.fault(&DriverError::AdapterUnavailable(
                "Bluetooth turned off".to_string(),
            ));
            return;
        }

        match state.locator.start(transport) {
            Ok(Some(generation)) => self.arm_scan_timeout(generation),
            Ok(None) => debug!("Scan already running"),
            Err(e) => state.bus.fault(&e),
        }
    }

    /// Stop both data sources. The discovered peripheral stays cached.
    pub fn close(&self) {
        info!("Closing");
        let transport = self.inner.transport.as_ref();
        let mut guard = self.lock();
        let state = &mut *guard;

        state.fallback.close();
        state.locator.stop(transport);
        state.session.close(transport);
        if state.bus.mode() == Mode::BlmConnected {
            state.bus.set_mode(Mode::Unknown);
            state.bus.set_status("BLM closed");
        }
    }

    /// Last status message.
    pub fn status(&self) -> String {
        self.lock().bus.status().to_string()
    }

    /// Current data source.
    pub fn mode(&self) -> Mode {
        self.lock().bus.mode()
    }

    /// Last ambient light reading, -1 when none arrived yet.
    pub fn lux(&self) -> f32 {
        self.lock().fallback.lux()
    }

    /// Current reading, in priority order: initializing, meter, lux, nolux.
    pub fn data(&self) -> String {
        let transport = self.inner.transport.as_ref();
        let mut guard = self.lock();
        Self::data_locked(&mut guard, transport)
    }

    /// Mode, status and data taken under one lock.
    pub fn snapshot(&self) -> MeterSnapshot {
        let transport = self.inner.transport.as_ref();
        let mut guard = self.lock();
        let data = Self::data_locked(&mut guard, transport);
        MeterSnapshot {
            mode: guard.bus.mode(),
            status: guard.bus.status().to_string(),
            data,
            lux: guard.fallback.lux(),
            characteristics_resolved: guard.session.characteristics_resolved(),
        }
    }

    /// Push configuration bytes, e.g. `"01 FF 0A"`, to the meter.
    ///
    /// Ignored unless the meter is connected. Malformed input is logged and
    /// leaves every piece of state untouched.
    pub fn set_parameters(&self, par: &str) {
        let value = match protocol::parse_parameters(par) {
            Ok(bytes) => protocol::to_wire(&bytes),
            Err(e) => {
                warn!("Ignoring parameters {:?}: {}", par, e);
                return;
            }
        };

        let transport = self.inner.transport.as_ref();
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.bus.mode() != Mode::BlmConnected {
            debug!("Ignoring parameters while meter not connected");
            return;
        }
        if let Err(e) = state.session.set_parameters(value, transport) {
            state.bus.fault(&e);
        }
    }

    /// Push an integration time and gain setting.
    pub fn configure(&self, config: &MeterConfig) {
        self.set_parameters(&config.to_parameters());
    }

    /// True while a write waits for the in-flight read.
    pub fn pending_write(&self) -> bool {
        self.lock().session.pending_write()
    }

    /// Whether a discovery scan is running.
    pub fn is_scanning(&self) -> bool {
        self.lock().locator.is_scanning()
    }

    /// The meter found by an earlier scan, if any.
    pub fn cached_peripheral(&self) -> Option<PeripheralHandle> {
        self.lock().session.cached_peripheral().cloned()
    }

    /// Single entry point of the state machine.
    pub fn handle_event(&self, event: DriverEvent) {
        let transport = self.inner.transport.as_ref();
        let mut guard = self.lock();
        let state = &mut *guard;

        match event {
            DriverEvent::Advertisement(advertisement) => {
                let already_found = state.session.cached_peripheral().is_some();
                if let Some(peripheral) =
                    state
                        .locator
                        .on_advertisement(&advertisement, already_found, transport)
                {
                    let found = format!("Found BLM: {}", peripheral);
                    info!("{}", found);
                    state.bus.set_status(found);
                    Self::connect(state, peripheral, transport);
                }
            }
            DriverEvent::Gatt { link, event } => {
                state
                    .session
                    .handle_event(link, event, transport, &mut state.bus);
            }
            DriverEvent::ScanTimeout { generation } => {
                if state.locator.on_timeout(generation, transport)
                    && !state.session.has_connection()
                {
                    state.bus.fault(&DriverError::DiscoveryTimeout);
                }
            }
        }
    }

    /// Drain transport events until every sender is gone.
    pub async fn run_event_pump(self, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Event pump finished");
    }

    /// Run [`Self::run_event_pump`] on the service runtime.
    pub fn spawn_event_pump(&self, events: mpsc::UnboundedReceiver<DriverEvent>) -> JoinHandle<()> {
        self.inner.runtime.spawn(self.clone().run_event_pump(events))
    }

    fn connect(state: &mut DriverState, peripheral: PeripheralHandle, transport: &dyn BleTransport) {
        // The old link's characteristics go away with it.
        if state.bus.mode() == Mode::BlmConnected {
            state.bus.set_mode(Mode::Unknown);
        }
        state.session.connect(peripheral, transport, &mut state.bus);
    }

    fn data_locked(state: &mut DriverState, transport: &dyn BleTransport) -> String {
        match state.bus.mode() {
            Mode::Unknown => "initializing:".to_string(),
            Mode::BlmConnected => state.session.value(transport, &mut state.bus),
            Mode::Error if state.fallback.has_reading() => {
                format!("lux: {}", format_lux(state.fallback.lux()))
            }
            Mode::Error => "nolux:".to_string(),
        }
    }

    fn arm_scan_timeout(&self, generation: u64) {
        let events = self.inner.events.clone();
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(SCAN_PERIOD).await;
            let _ = events.send(DriverEvent::ScanTimeout { generation });
        });
    }
}
