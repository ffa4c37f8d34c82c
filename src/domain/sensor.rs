//! Ambient light fallback used when no meter is connected.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Sentinel for "no reading yet".
pub const NO_LUX: f32 = -1.0;

/// Host ambient light sensor.
///
/// `register` starts delivering readings to the listener from the sensor's
/// own thread or task, `unregister` stops them.
pub trait AmbientLightSensor: Send + Sync {
    fn register(&self, listener: LuxListener) -> anyhow::Result<()>;
    fn unregister(&self);
}

/// Sink handed to the sensor; the last value wins.
#[derive(Debug, Clone)]
pub struct LuxListener {
    lux: Arc<Mutex<f32>>,
}

impl LuxListener {
    pub fn on_lux(&self, lux: f32) {
        *self.lux.lock().unwrap_or_else(PoisonError::into_inner) = lux;
    }
}

pub struct SensorFallback {
    sensor: Option<Arc<dyn AmbientLightSensor>>,
    lux: Arc<Mutex<f32>>,
    registered: bool,
}

impl SensorFallback {
    /// `sensor` is `None` when the host has no light sensor.
    pub fn new(sensor: Option<Arc<dyn AmbientLightSensor>>) -> Self {
        Self {
            sensor,
            lux: Arc::new(Mutex::new(NO_LUX)),
            registered: false,
        }
    }

    /// Register with the sensor, if there is one.
    pub fn init(&mut self) {
        let Some(sensor) = &self.sensor else {
            return;
        };
        if self.registered {
            return;
        }
        let listener = LuxListener {
            lux: self.lux.clone(),
        };
        match sensor.register(listener) {
            Ok(()) => {
                info!("Ambient light sensor registered");
                self.registered = true;
            }
            Err(e) => warn!("Could not register ambient light sensor: {}", e),
        }
    }

    /// Stop receiving updates. The last reading is kept.
    pub fn close(&mut self) {
        if let (Some(sensor), true) = (&self.sensor, self.registered) {
            sensor.unregister();
            self.registered = false;
        }
    }

    pub fn lux(&self) -> f32 {
        *self.lux.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A non-negative reading has arrived.
    pub fn has_reading(&self) -> bool {
        self.lux() >= 0.0
    }
}

/// Render a lux value with at least one decimal digit ("12.0", "0.25").
pub fn format_lux(lux: f32) -> String {
    if lux.fract() == 0.0 {
        format!("{:.1}", lux)
    } else {
        format!("{}", lux)
    }
}
