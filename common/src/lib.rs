pub mod config;
pub mod control;
pub mod page;
pub mod routes;
pub mod state;
pub mod stepper;
pub mod thermometer;
pub mod types;

pub use config::{FirmwareConfig, MotionConfig, MotionPattern, NetworkConfig, WiringConfig};
pub use control::{ControlLoop, TickReport};
pub use routes::{dispatch, HttpMethod, Reply, Route, RouteSpec, ROUTES};
pub use state::SharedState;
pub use stepper::{MotorActuator, MotorError, UnipolarStepper};
pub use thermometer::{
    OneWireThermometer, TemperatureReader, DEVICE_DISCONNECTED_C, DEVICE_DISCONNECTED_F,
};
pub use types::{MotorCommand, TemperatureReading, TemperatureUnit};
