use crate::types::{MotorCommand, TemperatureReading, TemperatureUnit};

/// The process-wide state shared by the HTTP handlers and the control loop.
///
/// Holds exactly one temperature reading and one motor latch. There is no
/// synchronization in here; binaries that serve HTTP from another task wrap
/// the single instance in a mutex at their edge.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    reading: TemperatureReading,
    motor: MotorCommand,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reading(&self) -> TemperatureReading {
        self.reading
    }

    pub fn temperature_text(&self, unit: TemperatureUnit) -> String {
        self.reading.render(unit)
    }

    /// Replaces the cached reading. Returns whether the value changed.
    pub fn store_reading(&mut self, reading: TemperatureReading) -> bool {
        let changed = self.reading != reading;
        self.reading = reading;
        changed
    }

    pub fn motor_command(&self) -> MotorCommand {
        self.motor
    }

    pub fn set_motor_command(&mut self, command: MotorCommand) -> bool {
        let changed = self.motor != command;
        self.motor = command;
        changed
    }
}
