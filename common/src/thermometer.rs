use log::warn;

use crate::types::{TemperatureReading, TemperatureUnit};

/// Value reported for Celsius when no device answers on the bus.
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;
/// Value reported for Fahrenheit when no device answers on the bus.
pub const DEVICE_DISCONNECTED_F: f32 = -196.6;

/// A one-wire thermometer driver in the Dallas style: conversions are
/// requested for the whole bus, values are fetched per device index, and a
/// missing device is signalled by a sentinel value rather than an error.
pub trait OneWireThermometer {
    /// Starts a conversion and blocks until it completes.
    fn request_temperatures(&mut self);
    fn temp_c_by_index(&mut self, index: u8) -> f32;
    fn temp_f_by_index(&mut self, index: u8) -> f32;
}

pub struct TemperatureReader<T> {
    device: T,
    index: u8,
}

impl<T: OneWireThermometer> TemperatureReader<T> {
    pub fn new(device: T) -> Self {
        Self { device, index: 0 }
    }

    /// Polls the bus once. Units are checked against their sentinel
    /// independently, so one may be available while the other is not.
    pub fn read_temperature(&mut self) -> TemperatureReading {
        self.device.request_temperatures();

        let celsius = self.device.temp_c_by_index(self.index);
        let fahrenheit = self.device.temp_f_by_index(self.index);

        TemperatureReading {
            celsius: accept(celsius, DEVICE_DISCONNECTED_C, TemperatureUnit::Celsius),
            fahrenheit: accept(
                fahrenheit,
                DEVICE_DISCONNECTED_F,
                TemperatureUnit::Fahrenheit,
            ),
        }
    }

    pub fn device_mut(&mut self) -> &mut T {
        &mut self.device
    }
}

fn accept(value: f32, sentinel: f32, unit: TemperatureUnit) -> Option<f32> {
    if value == sentinel {
        warn!(
            "could not read temperature data ({}): sensor disconnected",
            unit.as_str()
        );
        None
    } else {
        Some(value)
    }
}
