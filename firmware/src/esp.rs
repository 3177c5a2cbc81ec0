use std::{
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, AnyOutputPin, InputOutput, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::EspWifi,
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};

use motor_panel_common::{
    control::lock,
    routes::MAX_COMMAND_BODY,
    types::celsius_to_fahrenheit,
    ControlLoop, FirmwareConfig, HttpMethod, MotorActuator, NetworkConfig, OneWireThermometer,
    SharedState, TemperatureReader, DEVICE_DISCONNECTED_C, DEVICE_DISCONNECTED_F, ROUTES,
};

/// Must outlast one motion burst (two revolutions plus the pause).
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const HTTP_STACK_SIZE: usize = 10 * 1024;
/// Time handed to the HTTP server task between loop iterations.
const LOOP_YIELD_MS: u32 = 20;

type Coil = PinDriver<'static, AnyOutputPin, Output>;

/// DS18B20 behind the Dallas-style interface: the first DS18B20 found on the
/// bus is device 0, and any failed scan, conversion or scratchpad read is
/// reported through the disconnected sentinels.
struct Ds18b20Thermometer {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    delay: Ets,
    gpio: i32,
    latest_c: Option<f32>,
}

impl Ds18b20Thermometer {
    fn new(gpio: i32) -> anyhow::Result<Self> {
        let mut pin = unsafe { PinDriver::input_output_od(AnyIOPin::new(gpio)) }?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        let one_wire = OneWire::new(pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut thermometer = Self {
            one_wire,
            address: None,
            delay: Ets,
            gpio,
            latest_c: None,
        };
        thermometer.refresh_address();
        Ok(thermometer)
    }

    fn refresh_address(&mut self) {
        let mut first: Option<Address> = None;
        let mut device_count = 0_u32;

        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) => {
                    device_count = device_count.saturating_add(1);
                    if first.is_none() && address.family_code() == ds18b20::FAMILY_CODE {
                        first = Some(address);
                    }
                }
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.address = first;

        match self.address {
            Some(address) => info!(
                "DS18B20 ready on GPIO{} ({} one-wire device(s), using {:?})",
                self.gpio, device_count, address
            ),
            None => warn!(
                "no DS18B20 found on GPIO{} ({} one-wire device(s) detected)",
                self.gpio, device_count
            ),
        }
    }

    fn convert(&mut self) -> Option<f32> {
        if self.address.is_none() {
            self.refresh_address();
        }

        let address = self.address?;
        let sensor = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(sensor) => sensor,
            Err(err) => {
                warn!("invalid DS18B20 address {:?}: {err:?}", address);
                self.address = None;
                return None;
            }
        };

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!("failed to start DS18B20 conversion: {err:?}");
            self.address = None;
            return None;
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => Some(data.temperature),
            Err(err) => {
                warn!("failed to read DS18B20 data: {err:?}");
                self.address = None;
                None
            }
        }
    }
}

impl OneWireThermometer for Ds18b20Thermometer {
    fn request_temperatures(&mut self) {
        self.latest_c = self.convert();
    }

    fn temp_c_by_index(&mut self, index: u8) -> f32 {
        match (index, self.latest_c) {
            (0, Some(temp_c)) => temp_c,
            _ => DEVICE_DISCONNECTED_C,
        }
    }

    fn temp_f_by_index(&mut self, index: u8) -> f32 {
        match (index, self.latest_c) {
            (0, Some(temp_c)) => celsius_to_fahrenheit(temp_c),
            _ => DEVICE_DISCONNECTED_F,
        }
    }
}

/// Busy-waits below a millisecond-scale step and sleeps the task for longer
/// pauses.
struct MotorDelay;

impl embedded_hal::delay::DelayNs for MotorDelay {
    fn delay_ns(&mut self, ns: u32) {
        Ets::delay_us(ns.div_ceil(1_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = FirmwareConfig::default();
    ensure_wifi_defaults(&mut config.network);
    config.sanitize();

    info!(
        "config: ssid=`{}`, coils={:?}, one-wire=GPIO{}, {} steps/rev, sense every {}ms",
        config.network.wifi_ssid,
        config.wiring.coil_order(),
        config.wiring.one_wire_pin,
        config.motion.steps_per_revolution,
        config.sense_interval_ms,
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let thermometer = Ds18b20Thermometer::new(config.wiring.one_wire_pin)
        .context("failed to initialize temperature sensor")?;
    let coils = init_coils(config.wiring.coil_order()).context("failed to initialize motor pins")?;
    let actuator = MotorActuator::new(coils, MotorDelay, config.motion.clone());
    let mut control = ControlLoop::new(
        TemperatureReader::new(thermometer),
        actuator,
        config.sense_interval_ms,
    );

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;

    let state = Arc::new(Mutex::new(SharedState::new()));
    let server = create_http_server(state.clone(), &config.network)?;
    info!("http server listening on port {}", config.network.http_port);

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        feed_watchdog();
        FreeRtos::delay_ms(LOOP_YIELD_MS);

        let report = control.tick(monotonic_ms(), &state);
        if report.burst {
            feed_watchdog();
        }
    }
}

fn init_coils(pins: [i32; 4]) -> anyhow::Result<[Coil; 4]> {
    let mut coils = Vec::with_capacity(pins.len());
    for gpio in pins {
        let mut coil = unsafe { PinDriver::output(AnyOutputPin::new(gpio)) }
            .with_context(|| format!("failed to configure GPIO{gpio} as output"))?;
        coil.set_low()?;
        coils.push(coil);
    }

    coils
        .try_into()
        .map_err(|_| anyhow!("expected exactly four coil pins"))
}

fn create_http_server(
    state: Arc<Mutex<SharedState>>,
    network: &NetworkConfig,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: network.http_port,
        stack_size: HTTP_STACK_SIZE,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for spec in ROUTES {
        let state = state.clone();
        let route = spec.route;
        let method = match spec.method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
        };

        server.fn_handler::<anyhow::Error, _>(spec.path, method, move |mut req| {
            let body = read_request_body(&mut req)?;
            let reply = motor_panel_common::dispatch(route, &body, &mut lock(&state));
            req.into_response(reply.status, None, &[("Content-Type", reply.content_type)])?
                .write_all(reply.body.as_bytes())?;
            Ok(())
        })?;
    }

    Ok(server)
}

/// Oversized bodies are left unread; the handler treats them as unrecognized.
fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len == 0 || len > MAX_COMMAND_BODY {
        return Ok(Vec::new());
    }

    let mut body = vec![0_u8; len];
    req.read_exact(&mut body)?;
    Ok(body)
}

fn ensure_wifi_defaults(network: &mut NetworkConfig) {
    if let Some(ssid) = option_env!("WIFI_SSID") {
        network.wifi_ssid = ssid.to_string();
    }

    if let Some(pass) = option_env!("WIFI_PASS") {
        network.wifi_pass = pass.to_string();
    }
}

/// Associates within the configured window. On timeout the radio is left
/// running and the firmware carries on offline; there is no reassociation.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    if let Err(err) = wifi.connect() {
        warn!("wifi connect request failed ({err}); proceeding offline");
        return Ok(wifi);
    }

    let deadline = Instant::now() + Duration::from_millis(network.connect_timeout_ms);
    let poll = Duration::from_millis(network.connect_poll_interval_ms);
    while !is_wifi_ready(&wifi) && Instant::now() < deadline {
        thread::sleep(poll);
    }

    if is_wifi_ready(&wifi) {
        match wifi.sta_netif().get_ip_info() {
            Ok(ip_info) => info!("connected to wifi, ip address {}", ip_info.ip),
            Err(err) => warn!("connected to wifi but ip info is unavailable: {err}"),
        }
        disable_wifi_power_save();
    } else {
        warn!(
            "failed to connect to wifi within {}ms; proceeding offline",
            network.connect_timeout_ms
        );
    }

    Ok(wifi)
}

fn is_wifi_ready(wifi: &EspWifi<'static>) -> bool {
    wifi.is_connected().unwrap_or(false) && wifi.sta_netif().is_up().unwrap_or(false)
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

/// Only subscribed tasks are watched; the idle tasks are not.
fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let mut rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        rc = unsafe { esp_idf_svc::sys::esp_task_wdt_reconfigure(&config) };
    }
    if rc == esp_idf_svc::sys::ESP_OK {
        return Ok(());
    }
    Err(anyhow!("task watchdog setup failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
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
