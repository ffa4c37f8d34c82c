use blue_light_meter::domain::sensor::AmbientLightSensor;
use blue_light_meter::domain::settings::SettingsService;
use blue_light_meter::infrastructure::bluetooth::protocol::{DataLine, MeterUpdate};
use blue_light_meter::infrastructure::bluetooth::{BtleplugTransport, MeterService};
use blue_light_meter::infrastructure::light_sensor::IioLightSensor;
use blue_light_meter::infrastructure::logging::init_logger;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Blue Light Meter");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(BtleplugTransport::new(events_tx.clone()).await?);

    let light_sensor: Option<Arc<dyn AmbientLightSensor>> = match &settings.light_sensor_path {
        Some(path) => Some(Arc::new(IioLightSensor::with_path(path, Handle::current()))
            as Arc<dyn AmbientLightSensor>),
        None => IioLightSensor::discover(Handle::current())
            .map(|s| Arc::new(s) as Arc<dyn AmbientLightSensor>),
    };
    if light_sensor.is_none() {
        warn!("No ambient light sensor on this host");
    }

    let service = MeterService::new(transport, light_sensor, events_tx, Handle::current());
    let pump = service.spawn_event_pump(events_rx);

    service.init();

    let mut ticker = tokio::time::interval(settings.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&service),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    service.close();
    pump.abort();
    info!("Stopped");
    Ok(())
}

fn report(service: &MeterService) {
    let snapshot = service.snapshot();
    if let Ok(DataLine::Blm(bytes)) = DataLine::parse(&snapshot.data) {
        match MeterUpdate::parse(&bytes) {
            Ok(update) => info!(run = update.run, lux = update.lux(), "Meter reading"),
            Err(e) => warn!("Undecodable meter value: {}", e),
        }
    }
    match serde_json::to_string(&snapshot) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Could not serialize snapshot: {}", e),
    }
}
