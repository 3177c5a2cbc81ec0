/// Text served for a unit whose latest poll reported the disconnected sentinel.
pub const UNAVAILABLE_TEXT: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Celsius => "C",
            Self::Fahrenheit => "F",
        }
    }
}

/// Latest temperature poll. Each unit is `None` when the sensor reported its
/// disconnected sentinel for that unit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureReading {
    pub celsius: Option<f32>,
    pub fahrenheit: Option<f32>,
}

impl TemperatureReading {
    pub const UNAVAILABLE: Self = Self {
        celsius: None,
        fahrenheit: None,
    };

    pub fn value(&self, unit: TemperatureUnit) -> Option<f32> {
        match unit {
            TemperatureUnit::Celsius => self.celsius,
            TemperatureUnit::Fahrenheit => self.fahrenheit,
        }
    }

    pub fn render(&self, unit: TemperatureUnit) -> String {
        match self.value(unit) {
            Some(value) => format!("{value:.1}"),
            None => UNAVAILABLE_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MotorCommand {
    On,
    #[default]
    Off,
}

impl MotorCommand {
    /// Exact, case-sensitive match on the wire tokens.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ON" => Some(Self::On),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn renders_one_decimal_or_placeholder() {
        let reading = TemperatureReading {
            celsius: Some(21.5),
            fahrenheit: None,
        };

        assert_eq!(reading.render(TemperatureUnit::Celsius), "21.5");
        assert_eq!(reading.render(TemperatureUnit::Fahrenheit), "--");
        assert_eq!(
            TemperatureReading::default().render(TemperatureUnit::Celsius),
            "--"
        );
    }

    #[test]
    fn motor_tokens_are_case_sensitive() {
        assert_eq!(MotorCommand::parse("ON"), Some(MotorCommand::On));
        assert_eq!(MotorCommand::parse("OFF"), Some(MotorCommand::Off));
        assert_eq!(MotorCommand::parse("on"), None);
        assert_eq!(MotorCommand::parse("Off"), None);
        assert_eq!(MotorCommand::parse(" ON"), None);
        assert_eq!(MotorCommand::parse("MAYBE"), None);
    }

    #[test]
    fn converts_celsius_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert_eq!(format!("{:.1}", celsius_to_fahrenheit(21.5)), "70.7");
    }
}
