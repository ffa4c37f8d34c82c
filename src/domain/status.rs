use crate::domain::models::Mode;
use crate::error::DriverError;
use tracing::error;

/// Last known condition of the driver: one status message and the mode.
///
/// Lives inside the service state, so it is only ever touched under the
/// service lock.
#[derive(Debug, Clone)]
pub struct StatusBus {
    status: String,
    mode: Mode,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self {
            status: "DEFAULT".to_string(),
            mode: Mode::Unknown,
        }
    }
}

impl StatusBus {
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Overwrite the status message.
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Record a fault: status and mode always move together.
    pub fn fault(&mut self, err: &DriverError) {
        error!("{}", err);
        self.status = err.to_string();
        self.mode = Mode::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_sets_status_and_mode() {
        let mut bus = StatusBus::default();
        bus.set_mode(Mode::BlmConnected);
        bus.fault(&DriverError::UnexpectedDisconnect("link lost".into()));
        assert_eq!(bus.mode(), Mode::Error);
        assert_eq!(bus.status(), "BLM disconnected: link lost");
    }

    #[test]
    fn test_status_overwrites() {
        let mut bus = StatusBus::default();
        bus.set_status("first");
        bus.set_status("second");
        assert_eq!(bus.status(), "second");
        assert_eq!(bus.mode(), Mode::Unknown);
    }
}
