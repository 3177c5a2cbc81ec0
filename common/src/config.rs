use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_STEPS_PER_REVOLUTION: u32 = 2048;
pub const DEFAULT_SENSE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_STEP_DELAY_MS: u32 = 2;
pub const DEFAULT_DIRECTION_PAUSE_MS: u32 = 1_000;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_WIFI_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_WIFI_POLL_INTERVAL_MS: u64 = 500;

const MIN_STEPS_PER_REVOLUTION: u32 = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WiringConfig {
    pub in1_pin: i32,
    pub in2_pin: i32,
    pub in3_pin: i32,
    pub in4_pin: i32,
    pub one_wire_pin: i32,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            in1_pin: 26,
            in2_pin: 25,
            in3_pin: 33,
            in4_pin: 32,
            one_wire_pin: 4,
        }
    }
}

impl WiringConfig {
    /// Coil drive order expected by the full-step sequence (IN1, IN3, IN2, IN4).
    pub fn coil_order(&self) -> [i32; 4] {
        [self.in1_pin, self.in3_pin, self.in2_pin, self.in4_pin]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPattern {
    /// One revolution forward, a pause, one revolution back.
    FullRevolutionSweep,
    /// A quarter turn per burst, flipping direction every burst.
    AlternatingQuarterTurn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub steps_per_revolution: u32,
    pub step_delay_ms: u32,
    pub direction_pause_ms: u32,
    pub pattern: MotionPattern,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            steps_per_revolution: DEFAULT_STEPS_PER_REVOLUTION,
            step_delay_ms: DEFAULT_STEP_DELAY_MS,
            direction_pause_ms: DEFAULT_DIRECTION_PAUSE_MS,
            pattern: MotionPattern::FullRevolutionSweep,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub http_port: u16,
    pub connect_timeout_ms: u64,
    pub connect_poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: "ESP32 Test".to_string(),
            wifi_pass: String::new(),
            http_port: DEFAULT_HTTP_PORT,
            connect_timeout_ms: DEFAULT_WIFI_CONNECT_TIMEOUT_MS,
            connect_poll_interval_ms: DEFAULT_WIFI_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    pub wiring: WiringConfig,
    pub motion: MotionConfig,
    pub network: NetworkConfig,
    pub sense_interval_ms: u64,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            wiring: WiringConfig::default(),
            motion: MotionConfig::default(),
            network: NetworkConfig::default(),
            sense_interval_ms: DEFAULT_SENSE_INTERVAL_MS,
        }
    }
}

impl FirmwareConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.motion.sanitize();
        self.network.sanitize();
    }
}

impl MotionConfig {
    pub fn sanitize(&mut self) {
        self.steps_per_revolution = self.steps_per_revolution.max(MIN_STEPS_PER_REVOLUTION);
        self.step_delay_ms = self.step_delay_ms.max(1);
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        if self.http_port == 0 {
            self.http_port = DEFAULT_HTTP_PORT;
        }
        if self.connect_poll_interval_ms == 0 {
            self.connect_poll_interval_ms = DEFAULT_WIFI_POLL_INTERVAL_MS;
        }
    }
}
