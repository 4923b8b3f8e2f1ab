//! Desktop simulator for the BMP280 telemetry uplink.
//!
//! Runs the uplink-core telemetry loop against a simulated BMP280 and a
//! simulated network stack with a fake collector, on a virtual clock, so the
//! whole sample → format → uplink path can be exercised without hardware.
//!
//! # Environment
//!
//! Read from the process environment after loading `.env`, if present.
//!
//! | Variable                  | Default           |
//! |---------------------------|-------------------|
//! | `WIFI_SSID`               | (empty)           |
//! | `WIFI_PASSWORD`           | (empty)           |
//! | `AIO_HOST`                | `io.adafruit.com` |
//! | `AIO_USERNAME`            | `sim-user`        |
//! | `AIO_KEY`                 | `sim-key`         |
//! | `AIO_FEED_TEMPERATURE`    | `bmp280-temp`     |
//! | `AIO_FEED_PRESSURE`       | `bmp280-pressure` |
//! | `UPLINK_TLS_POLICY`       | `shared`          |
//! | `SIM_CYCLES`              | `30`              |
//! | `SIM_DROP_EVERY`          | `0` (never)       |
//! | `SIM_MAX_HANDLES`         | `4`               |
//!
//! Set `SIM_DROP_EVERY=3` to watch the liveness timeout tear down every third
//! uplink. Logging is controlled by `RUST_LOG` (default `info`).

mod sim_bus;
mod sim_network;

use std::cell::RefCell;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;

use critical_section::Mutex;
use embedded_hal_bus::i2c::CriticalSectionDevice;
use log::{error, info};
use static_cell::StaticCell;

use uplink_core::config::{
    CollectorConfig, Config, DEFAULT_COLLECTOR_HOST, DEFAULT_PRESSURE_FEED,
    DEFAULT_TEMPERATURE_FEED, InternetConfig,
};
use uplink_core::sampling::{CycleReport, TelemetryLoop};
use uplink_core::sensors::Bmp280Sensor;
use uplink_core::uplink::{TlsReusePolicy, TrustAnchors, UplinkClient};

use sim_bus::SimBmp280;
use sim_network::{CollectorModel, SimNetwork};

static I2C_BUS: StaticCell<Mutex<RefCell<SimBmp280>>> = StaticCell::new();

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Owned settings the borrowed [`Config`] points into.
struct SimEnv {
    ssid: String,
    password: String,
    host: String,
    username: String,
    api_key: String,
    temperature_feed: String,
    pressure_feed: String,
    tls_policy: TlsReusePolicy,
    cycles: u32,
    drop_every: u32,
    max_handles: usize,
}

impl SimEnv {
    fn load() -> Self {
        Self {
            ssid: var_or("WIFI_SSID", ""),
            password: var_or("WIFI_PASSWORD", ""),
            host: var_or("AIO_HOST", DEFAULT_COLLECTOR_HOST),
            username: var_or("AIO_USERNAME", "sim-user"),
            api_key: var_or("AIO_KEY", "sim-key"),
            temperature_feed: var_or("AIO_FEED_TEMPERATURE", DEFAULT_TEMPERATURE_FEED),
            pressure_feed: var_or("AIO_FEED_PRESSURE", DEFAULT_PRESSURE_FEED),
            tls_policy: match var_or("UPLINK_TLS_POLICY", "shared").as_str() {
                "per-uplink" | "per_uplink" => TlsReusePolicy::PerUplink,
                _ => TlsReusePolicy::Shared,
            },
            cycles: parse_or("SIM_CYCLES", 30),
            drop_every: parse_or("SIM_DROP_EVERY", 0),
            max_handles: parse_or("SIM_MAX_HANDLES", 4),
        }
    }

    fn config(&self) -> Config<'_> {
        let mut config = Config {
            internet: InternetConfig {
                ssid: &self.ssid,
                password: &self.password,
            },
            collector: CollectorConfig {
                host: &self.host,
                username: &self.username,
                api_key: &self.api_key,
                temperature_feed: &self.temperature_feed,
                pressure_feed: &self.pressure_feed,
                ..CollectorConfig::default()
            },
            ..Config::default()
        };
        config.uplink.tls_policy = self.tls_policy;
        config
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sim_env = SimEnv::load();
    let config = sim_env.config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("=== BMP280 telemetry uplink simulator ===");
    if !config.internet.ssid.is_empty() {
        info!("Wi-Fi network {} (simulated link is always up)", config.internet.ssid);
    }
    info!(
        "Feeds: {} (temp), {} (pressure), TLS policy {:?}",
        config.collector.temperature_feed, config.collector.pressure_feed, config.uplink.tls_policy
    );

    let bus = I2C_BUS.init(Mutex::new(RefCell::new(SimBmp280::new())));
    let sensor = Bmp280Sensor::new(CriticalSectionDevice::new(bus));

    let network = SimNetwork::new(CollectorModel {
        username: sim_env.username.clone(),
        api_key: sim_env.api_key.clone(),
        feeds: vec![
            sim_env.temperature_feed.clone(),
            sim_env.pressure_feed.clone(),
        ],
        drop_every: sim_env.drop_every,
    });

    let client = UplinkClient::new(
        config.collector,
        config.uplink,
        network.connector(sim_env.max_handles),
        network.resolver(),
        TrustAnchors::BuiltIn,
    );
    let mut telemetry = TelemetryLoop::new(sensor, client, config.sampling);
    let mut platform = network.platform();

    let mut delivered = 0u32;
    for _ in 0..sim_env.cycles {
        if let CycleReport::Uplinked { delivered: true, .. } = telemetry.step(&mut platform) {
            delivered += 1;
        }
    }

    let stats = telemetry.stats();
    info!(
        "--- Simulation finished after {} ms of virtual time ---",
        network.elapsed().as_millis()
    );
    info!(
        "Samples: {}, read failures: {}, bursts delivered: {}",
        stats.samples, stats.read_failures, delivered
    );
    info!(
        "Uplinks: {} attempted, {} succeeded, {} failed (last error: {:?})",
        stats.uplinks_attempted, stats.uplinks_succeeded, stats.uplinks_failed, stats.last_error
    );

    let tls = telemetry.client_mut().tls_mut();
    let created = tls.contexts_created();
    let released = tls.release_unused();
    info!("TLS contexts created: {}, released at shutdown: {}", created, released);
    info!(
        "Collector saw {} requests, {} handles still open",
        network.requests(),
        network.open_handles()
    );

    if network.open_handles() != 0 {
        error!("Transport handles leaked");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
