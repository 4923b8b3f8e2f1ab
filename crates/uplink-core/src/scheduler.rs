//! Cooperative event loop seam
//!
//! The network stack is driven by a single-threaded loop owned by the
//! platform. The core only needs three primitives from it: a clock, a poll
//! that lets the stack process pending work, and a bounded sleep that ends
//! early when new work arrives.

use embassy_time::{Duration, Instant};
use log::warn;

use crate::uplink::{Resolver, Transport, UplinkConnection};

/// Upper bound for one sleep of the wait loop
pub const WAIT_TICK: Duration = Duration::from_millis(10);

pub trait Scheduler {
    fn now(&self) -> Instant;

    /// Let the network stack process whatever is pending.
    fn poll(&mut self);

    /// Sleep until `deadline` or until there is new work, whichever comes first.
    fn wait_for_work_until(&mut self, deadline: Instant);
}

/// Caller-owned bounded wait loop.
///
/// Polls the scheduler and services every connection until all of them are
/// `Done`. Connections still running when `budget` is used up are torn down
/// with a timeout, so they never outlive the call. Returns `true` if every
/// connection finished on its own.
pub fn wait_for_completion<S, R, T>(
    scheduler: &mut S,
    resolver: &mut R,
    connections: &mut [UplinkConnection<T>],
    budget: Duration,
) -> bool
where
    S: Scheduler,
    R: Resolver,
    T: Transport,
{
    let deadline = scheduler.now() + budget;

    loop {
        scheduler.poll();
        let now = scheduler.now();

        for connection in connections.iter_mut() {
            connection.service(resolver, now);
        }

        if connections.iter().all(|c| c.is_complete()) {
            return true;
        }

        if now >= deadline {
            warn!("Connection timeout after {} ms", budget.as_millis());
            for connection in connections.iter_mut() {
                connection.expire(now);
            }
            return false;
        }

        scheduler.wait_for_work_until(deadline.min(now + WAIT_TICK));
    }
}
