//! Linux IIO ambient light sensor.
//!
//! Polls the illuminance attribute of an industrial-I/O device at UI
//! refresh cadence and feeds every value to the registered listener.

use crate::domain::sensor::{AmbientLightSensor, LuxListener};
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const IIO_DEVICES: &str = "/sys/bus/iio/devices";

/// Matches the rate of a UI-grade sensor subscription.
pub const POLL_INTERVAL: Duration = Duration::from_millis(60);

#[derive(Debug, Clone, PartialEq)]
enum Source {
    /// `in_illuminance_input`, already in lux.
    Input(PathBuf),
    /// `in_illuminance_raw` times `in_illuminance_scale`.
    Raw { raw: PathBuf, scale: Option<PathBuf> },
}

pub struct IioLightSensor {
    source: Source,
    runtime: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IioLightSensor {
    /// Find the first IIO device exposing illuminance.
    pub fn discover(runtime: Handle) -> Option<Self> {
        let entries = fs::read_dir(IIO_DEVICES).ok()?;
        let mut devices: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        devices.sort();
        let source = devices.iter().find_map(|dir| source_in(dir))?;
        info!("Found ambient light sensor: {:?}", source);
        Some(Self::with_source(source, runtime))
    }

    /// Use an explicit illuminance file (`*_input` in lux, or `*_raw`).
    pub fn with_path(path: impl Into<PathBuf>, runtime: Handle) -> Self {
        let path = path.into();
        let is_raw = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_raw"));
        let source = if is_raw {
            let scale = path.with_file_name("in_illuminance_scale");
            Source::Raw {
                scale: scale.exists().then_some(scale),
                raw: path,
            }
        } else {
            Source::Input(path)
        };
        Self::with_source(source, runtime)
    }

    fn with_source(source: Source, runtime: Handle) -> Self {
        Self {
            source,
            runtime,
            task: Mutex::new(None),
        }
    }
}

fn source_in(dir: &Path) -> Option<Source> {
    let input = dir.join("in_illuminance_input");
    if input.exists() {
        return Some(Source::Input(input));
    }
    let raw = dir.join("in_illuminance_raw");
    if raw.exists() {
        let scale = dir.join("in_illuminance_scale");
        return Some(Source::Raw {
            raw,
            scale: scale.exists().then_some(scale),
        });
    }
    None
}

/// Parse a sysfs numeric attribute.
fn parse_sysfs_value(text: &str) -> Result<f32> {
    Ok(text.trim().parse::<f32>()?)
}

async fn read_value(path: &Path) -> Result<f32> {
    parse_sysfs_value(&tokio::fs::read_to_string(path).await?)
}

async fn read_lux(source: &Source) -> Result<f32> {
    match source {
        Source::Input(path) => read_value(path).await,
        Source::Raw { raw, scale } => {
            let raw = read_value(raw).await?;
            let scale = match scale {
                Some(path) => read_value(path).await?,
                None => 1.0,
            };
            Ok(raw * scale)
        }
    }
}

impl AmbientLightSensor for IioLightSensor {
    fn register(&self, listener: LuxListener) -> Result<()> {
        let mut task = self.task.lock().map_err(|_| anyhow::anyhow!("Lock error"))?;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let source = self.source.clone();
        *task = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                match read_lux(&source).await {
                    Ok(lux) => listener.on_lux(lux),
                    Err(e) => debug!("Light sensor read failed: {}", e),
                }
            }
        }));
        Ok(())
    }

    fn unregister(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for IioLightSensor {
    fn drop(&mut self) {
        self.unregister();
    }
}
