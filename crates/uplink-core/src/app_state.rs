//! Application-wide run state and uplink counters

use serde::{Deserialize, Serialize};

use crate::uplink::UplinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRunState {
    Uninitialized,
    Sampling,
    Uplinking,
    Error,
}

/// Running totals for the telemetry loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkStats {
    pub samples: u32,
    pub read_failures: u32,
    pub uplinks_attempted: u32,
    pub uplinks_succeeded: u32,
    pub uplinks_failed: u32,
    pub last_error: Option<UplinkError>,
}

impl UplinkStats {
    pub fn record_uplink(&mut self, result: Result<(), UplinkError>) {
        self.uplinks_attempted += 1;
        match result {
            Ok(()) => self.uplinks_succeeded += 1,
            Err(e) => {
                self.uplinks_failed += 1;
                self.last_error = Some(e);
            }
        }
    }
}
