use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{MethodFilter, MethodRouter},
    Router,
};
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, OutputPin},
};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

use motor_panel_common::{
    control::lock, dispatch, types::celsius_to_fahrenheit, ControlLoop, FirmwareConfig,
    HttpMethod, MotorActuator, OneWireThermometer, Route, SharedState, TemperatureReader,
    DEVICE_DISCONNECTED_C, DEVICE_DISCONNECTED_F, ROUTES,
};

const HOST_HTTP_PORT: u16 = 8080;
const DEFAULT_SIM_TEMP_C: f32 = 21.5;
/// Idle time between loop iterations, standing in for the network poll.
const LOOP_IDLE_MS: u64 = 50;

#[derive(Clone)]
struct AppState {
    shared: Arc<Mutex<SharedState>>,
}

/// Stand-in for the DS18B20: a fixed base temperature with a small
/// repeating drift, or the disconnected sentinels.
struct SimulatedThermometer {
    base_c: f32,
    disconnected: bool,
    conversions: u64,
    current_c: f32,
}

impl SimulatedThermometer {
    fn new(base_c: f32, disconnected: bool) -> Self {
        Self {
            base_c,
            disconnected,
            conversions: 0,
            current_c: base_c,
        }
    }

    fn from_env() -> Self {
        let base_c = env_parse::<f32>("SIM_TEMP_C").unwrap_or(DEFAULT_SIM_TEMP_C);
        let disconnected = std::env::var("SIM_SENSOR_DISCONNECTED")
            .map(|value| !matches!(value.as_str(), "" | "0" | "false"))
            .unwrap_or(false);
        Self::new(base_c, disconnected)
    }
}

impl OneWireThermometer for SimulatedThermometer {
    fn request_temperatures(&mut self) {
        self.current_c = self.base_c + ((self.conversions % 8) as f32 * 0.1);
        self.conversions = self.conversions.saturating_add(1);
    }

    fn temp_c_by_index(&mut self, index: u8) -> f32 {
        if self.disconnected || index != 0 {
            DEVICE_DISCONNECTED_C
        } else {
            self.current_c
        }
    }

    fn temp_f_by_index(&mut self, index: u8) -> f32 {
        if self.disconnected || index != 0 {
            DEVICE_DISCONNECTED_F
        } else {
            celsius_to_fahrenheit(self.current_c)
        }
    }
}

struct SimulatedCoil {
    gpio: i32,
}

impl ErrorType for SimulatedCoil {
    type Error = Infallible;
}

impl OutputPin for SimulatedCoil {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        trace!("GPIO{} low", self.gpio);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        trace!("GPIO{} high", self.gpio);
        Ok(())
    }
}

struct ThreadDelay;

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config().unwrap_or_else(|err| {
        warn!("failed to load config, using defaults: {err:#}");
        FirmwareConfig::default()
    });
    info!("config: {}", serde_json::to_string(&config)?);

    let app_state = AppState {
        shared: Arc::new(Mutex::new(SharedState::new())),
    };

    spawn_control_loop(app_state.clone(), &config)?;

    let port = env_parse::<u16>("HTTP_PORT").unwrap_or(HOST_HTTP_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http server at {addr}"))?;

    info!("motor panel simulation listening on http://{addr}");
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn load_config() -> anyhow::Result<FirmwareConfig> {
    let raw = match std::env::var("CONFIG_PATH") {
        Ok(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?,
        ),
        Err(_) => None,
    };

    apply_config_sources(raw.as_deref(), env_parse::<u64>("SENSE_INTERVAL_MS"))
}

/// Builds the config from an optional JSON document, then applies the
/// environment overrides.
fn apply_config_sources(
    raw: Option<&str>,
    sense_interval_ms: Option<u64>,
) -> anyhow::Result<FirmwareConfig> {
    let mut config = match raw {
        Some(raw) => FirmwareConfig::from_json(raw).context("invalid config file")?,
        None => FirmwareConfig::default(),
    };

    if let Some(interval_ms) = sense_interval_ms {
        config.sense_interval_ms = interval_ms;
    }
    config.sanitize();
    Ok(config)
}

fn spawn_control_loop(app_state: AppState, config: &FirmwareConfig) -> anyhow::Result<()> {
    let coils = config
        .wiring
        .coil_order()
        .map(|gpio| SimulatedCoil { gpio });
    let actuator = MotorActuator::new(coils, ThreadDelay, config.motion.clone());
    let mut control = ControlLoop::new(
        TemperatureReader::new(SimulatedThermometer::from_env()),
        actuator,
        config.sense_interval_ms,
    );

    thread::Builder::new()
        .name("control-loop".into())
        .spawn(move || loop {
            let report = control.tick(monotonic_ms(), &app_state.shared);
            if report.burst {
                debug!("burst {} finished", control.actuator().bursts());
            }
            thread::sleep(Duration::from_millis(LOOP_IDLE_MS));
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn build_router(app_state: AppState) -> Router {
    let mut router = Router::new();
    let mut paths: Vec<&'static str> = ROUTES.iter().map(|spec| spec.path).collect();
    paths.dedup();

    for path in paths {
        let mut methods: MethodRouter<AppState> = MethodRouter::new();
        for spec in ROUTES.iter().filter(|spec| spec.path == path) {
            let route = spec.route;
            let filter = match spec.method {
                HttpMethod::Get => MethodFilter::GET,
                HttpMethod::Post => MethodFilter::POST,
            };
            methods = methods.on(filter, move |State(state): State<AppState>, body: Bytes| {
                handle_route(state, route, body)
            });
        }
        router = router.route(path, methods);
    }

    router.with_state(app_state)
}

async fn handle_route(state: AppState, route: Route, body: Bytes) -> impl IntoResponse {
    let reply = dispatch(route, &body, &mut lock(&state.shared));
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, reply.content_type)],
        reply.body.into_owned(),
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse::<T>().ok())
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
