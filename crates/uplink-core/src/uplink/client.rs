use core::slice;

use log::{error, info};

use super::UplinkError;
use super::connection::UplinkConnection;
use super::tls::{TlsContextProvider, TrustAnchors};
use super::transport::{Connector, Resolver};
use crate::config::{CollectorConfig, UplinkSettings};
use crate::scheduler::{Scheduler, wait_for_completion};
use crate::telemetry::UplinkRequest;

/// Sends single feed values to the collector, one blocking uplink at a time.
pub struct UplinkClient<'a, C, R> {
    collector: CollectorConfig<'a>,
    settings: UplinkSettings,
    connector: C,
    resolver: R,
    tls: TlsContextProvider,
}

impl<'a, C, R> UplinkClient<'a, C, R>
where
    C: Connector,
    R: Resolver,
{
    pub fn new(
        collector: CollectorConfig<'a>,
        settings: UplinkSettings,
        connector: C,
        resolver: R,
        trust: TrustAnchors,
    ) -> Self {
        Self {
            collector,
            settings,
            connector,
            resolver,
            tls: TlsContextProvider::new(settings.tls_policy, trust),
        }
    }

    pub fn collector(&self) -> &CollectorConfig<'a> {
        &self.collector
    }

    pub fn tls(&self) -> &TlsContextProvider {
        &self.tls
    }

    pub fn tls_mut(&mut self) -> &mut TlsContextProvider {
        &mut self.tls
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Post `value` to `feed_key` and wait for the outcome.
    ///
    /// Returns once the connection is `Done`, or after the configured wait
    /// budget, in which case the connection is torn down with a timeout.
    pub fn send<S: Scheduler>(
        &mut self,
        scheduler: &mut S,
        feed_key: &str,
        value: f32,
    ) -> Result<(), UplinkError> {
        let request = UplinkRequest::build(&self.collector, feed_key, value)?;
        let tls = self.tls.acquire();

        info!("Opening connection to {}...", self.collector.host);
        let Some(handle) = self.connector.open(&tls) else {
            error!("Failed to create transport handle");
            return Err(UplinkError::ConnectFailure);
        };

        let now = scheduler.now();
        let mut connection = UplinkConnection::new(
            handle,
            tls,
            request,
            self.collector.port,
            self.settings.timeout(),
            now,
        );
        connection.start(&mut self.resolver, self.collector.host, now);

        info!("Waiting for connection...");
        wait_for_completion(
            scheduler,
            &mut self.resolver,
            slice::from_mut(&mut connection),
            self.settings.wait_budget(),
        );

        connection.outcome().unwrap_or(Err(UplinkError::Timeout))
    }
}
