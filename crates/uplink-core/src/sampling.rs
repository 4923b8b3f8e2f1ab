//! Periodic sample-and-upload loop
//!
//! Reads the sensor every sampling period and, on every n-th sample (the
//! first one included), uploads the temperature in °C followed by the
//! pressure in kPa to their two feeds.

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::app_state::{AppRunState, UplinkStats};
use crate::compensation::CompensatedReading;
use crate::config::SamplingSettings;
use crate::scheduler::Scheduler;
use crate::sensors::Sensor;
use crate::uplink::{Connector, Resolver, UplinkClient};

/// What one [`TelemetryLoop::step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleReport {
    /// The sensor could not be read; the cycle was skipped
    ReadFailed,
    Sampled(CompensatedReading),
    /// Both feeds were attempted; `delivered` is true only if both succeeded
    Uplinked {
        reading: CompensatedReading,
        delivered: bool,
    },
}

pub struct TelemetryLoop<'a, S, C, R> {
    sensor: S,
    client: UplinkClient<'a, C, R>,
    settings: SamplingSettings,
    cycle: u32,
    run_state: AppRunState,
    stats: UplinkStats,
}

impl<'a, S, C, R> TelemetryLoop<'a, S, C, R>
where
    S: Sensor<Readings = CompensatedReading>,
    C: Connector,
    R: Resolver,
{
    pub fn new(sensor: S, client: UplinkClient<'a, C, R>, settings: SamplingSettings) -> Self {
        Self {
            sensor,
            client,
            settings,
            cycle: 0,
            run_state: AppRunState::Uninitialized,
            stats: UplinkStats::default(),
        }
    }

    pub fn run_state(&self) -> AppRunState {
        self.run_state
    }

    pub fn stats(&self) -> &UplinkStats {
        &self.stats
    }

    pub fn client(&self) -> &UplinkClient<'a, C, R> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut UplinkClient<'a, C, R> {
        &mut self.client
    }

    /// Run one sampling cycle, then sleep for the sampling period.
    ///
    /// `platform` is the event loop the uplinks run on; it also provides the
    /// blocking delays between feeds and between cycles.
    pub fn step<P>(&mut self, platform: &mut P) -> CycleReport
    where
        P: Scheduler + DelayNs,
    {
        let report = self.sample_and_send(platform);
        platform.delay_ms(self.settings.period_ms);
        report
    }

    fn sample_and_send<P>(&mut self, platform: &mut P) -> CycleReport
    where
        P: Scheduler + DelayNs,
    {
        let reading = match self.sensor.read() {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Sensor read failed, skipping cycle: {}", e);
                self.stats.read_failures += 1;
                self.run_state = AppRunState::Error;
                return CycleReport::ReadFailed;
            }
        };

        self.stats.samples += 1;
        self.run_state = AppRunState::Sampling;
        info!(
            "Temp: {:.2} C, Pressure: {:.3} kPa",
            reading.temperature_celsius(),
            reading.pressure_kilopascals()
        );

        let due = self.cycle % self.settings.send_every.max(1) == 0;
        self.cycle = self.cycle.wrapping_add(1);
        if !due {
            return CycleReport::Sampled(reading);
        }

        self.run_state = AppRunState::Uplinking;
        info!("Sending to collector...");

        let collector = *self.client.collector();
        let temperature = self
            .client
            .send(platform, collector.temperature_feed, reading.temperature_celsius());
        self.stats.record_uplink(temperature);

        platform.delay_ms(self.settings.feed_gap_ms);

        let pressure = self
            .client
            .send(platform, collector.pressure_feed, reading.pressure_kilopascals());
        self.stats.record_uplink(pressure);

        let delivered = temperature.is_ok() && pressure.is_ok();
        if delivered {
            info!("Data sent successfully!");
        } else {
            warn!(
                "Failed to send data (temperature: {:?}, pressure: {:?})",
                temperature, pressure
            );
        }
        self.run_state = AppRunState::Sampling;

        CycleReport::Uplinked { reading, delivered }
    }
}
