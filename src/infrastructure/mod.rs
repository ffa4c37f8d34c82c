pub mod bluetooth;
pub mod light_sensor;
pub mod logging;
