use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::uplink::TlsReusePolicy;

pub const DEFAULT_COLLECTOR_HOST: &str = "io.adafruit.com";
pub const DEFAULT_COLLECTOR_PORT: u16 = 443;
pub const DEFAULT_TEMPERATURE_FEED: &str = "bmp280-temp";
pub const DEFAULT_PRESSURE_FEED: &str = "bmp280-pressure";

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Config<'a> {
    pub internet: InternetConfig<'a>,
    pub collector: CollectorConfig<'a>,
    pub uplink: UplinkSettings,
    pub sampling: SamplingSettings,
}

impl Config<'_> {
    /// Reject settings that would make every uplink fail before any I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("collector.host", self.collector.host),
            ("collector.username", self.collector.username),
            ("collector.api_key", self.collector.api_key),
            ("collector.temperature_feed", self.collector.temperature_feed),
            ("collector.pressure_feed", self.collector.pressure_feed),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(ConfigError::MissingValue(field));
        }

        if self.collector.port == 0 {
            return Err(ConfigError::ZeroValue("collector.port"));
        }
        if self.uplink.timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("uplink.timeout_secs"));
        }
        if self.uplink.wait_budget_ms == 0 {
            return Err(ConfigError::ZeroValue("uplink.wait_budget_ms"));
        }
        if self.sampling.send_every == 0 {
            return Err(ConfigError::ZeroValue("sampling.send_every"));
        }

        Ok(())
    }
}

/// Wi-Fi credentials, handed to the link-management collaborator.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Remote collector the readings are posted to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct CollectorConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub api_key: &'a str,
    pub temperature_feed: &'a str,
    pub pressure_feed: &'a str,
}

impl Default for CollectorConfig<'_> {
    fn default() -> Self {
        Self {
            host: DEFAULT_COLLECTOR_HOST,
            port: DEFAULT_COLLECTOR_PORT,
            username: "",
            api_key: "",
            temperature_feed: DEFAULT_TEMPERATURE_FEED,
            pressure_feed: DEFAULT_PRESSURE_FEED,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkSettings {
    /// Per-request timeout; the liveness window is twice this value
    pub timeout_secs: u32,
    /// Budget of the caller's wait loop for one uplink
    pub wait_budget_ms: u32,
    pub tls_policy: TlsReusePolicy,
}

impl UplinkSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs as u64)
    }

    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.wait_budget_ms as u64)
    }
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            wait_budget_ms: 30_000,
            tls_policy: TlsReusePolicy::Shared,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSettings {
    /// Time between sensor reads
    pub period_ms: u32,
    /// Upload on every n-th sample
    pub send_every: u32,
    /// Pause between the temperature and the pressure upload
    pub feed_gap_ms: u32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            period_ms: 500,
            send_every: 10,
            feed_gap_ms: 1000,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    MissingValue(&'static str),
    #[error("configuration value must be non-zero: {0}")]
    ZeroValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config<'static> {
        Config {
            collector: CollectorConfig {
                username: "sensor-lab",
                api_key: "aio_key",
                ..CollectorConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults_follow_device_program() {
        let config = Config::default();
        assert_eq!(config.collector.host, "io.adafruit.com");
        assert_eq!(config.collector.port, 443);
        assert_eq!(config.uplink.timeout(), Duration::from_secs(15));
        assert_eq!(config.uplink.wait_budget(), Duration::from_secs(30));
        assert_eq!(config.sampling.send_every, 10);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert_eq!(complete().validate(), Ok(()));
    }

    #[test]
    fn test_validate_requires_credentials() {
        assert_eq!(
            Config::default().validate(),
            Err(ConfigError::MissingValue("collector.username"))
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = complete();
        config.uplink.timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue("uplink.timeout_secs"))
        );
    }

    #[test]
    fn test_deserialize_borrows_from_buffer() {
        let mut config = complete();
        config.internet.ssid = "lab-net";
        config.uplink.tls_policy = TlsReusePolicy::PerUplink;
        config.sampling.send_every = 4;
        let bytes = postcard::to_allocvec(&config).unwrap();

        let loaded: Config<'_> = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(loaded.internet.ssid, "lab-net");
        assert_eq!(loaded.collector.username, "sensor-lab");
        assert_eq!(loaded.collector.host, DEFAULT_COLLECTOR_HOST);
        assert_eq!(loaded.uplink, config.uplink);
        assert_eq!(loaded.sampling, config.sampling);
        assert_eq!(loaded.validate(), Ok(()));
    }
}
