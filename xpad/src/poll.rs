//! Bounded state polling.
//!
//! Waiting for a device to leave a state (typically `RUNNING` after a
//! `Snap`) is done by polling [`DeviceProxy::state`]. The sleep between polls
//! starts short and grows geometrically, and the whole wait is bounded by a
//! timeout.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::failure::{reasons, DevFailed, DevResult};
use crate::proxy::{DevState, DeviceProxy};

/// Shortest sleep between two polls, whatever the configuration says.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Timing of a state poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Give up after this long
    pub timeout: Duration,
    /// Sleep after the first poll
    pub initial_interval: Duration,
    /// Upper bound of the sleep between polls
    pub max_interval: Duration,
    /// Factor applied to the sleep after each poll
    pub backoff: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(100),
            backoff: 2.0,
        }
    }
}

impl PollConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep after the first poll, within `MIN_INTERVAL..=max_interval`.
    pub fn first_interval(&self) -> Duration {
        self.initial_interval
            .min(self.max_interval)
            .max(MIN_INTERVAL)
    }

    /// Sleep that follows `current`, never below [`MIN_INTERVAL`].
    pub fn next_interval(&self, current: Duration) -> Duration {
        let factor = if self.backoff.is_finite() && self.backoff >= 1.0 {
            self.backoff
        } else {
            1.0
        };
        let nanos = (current.as_nanos() as f64 * factor).round();
        let max = self.max_interval.as_nanos() as f64;
        Duration::from_nanos(nanos.min(max) as u64).max(MIN_INTERVAL)
    }
}

/// Poll `proxy` until its state differs from `state`.
///
/// Returns the first state seen that is not `state`.
///
/// # Errors
///
/// Any failure of the state query is returned as is. If the device is still
/// in `state` when `config.timeout` has elapsed, fails with
/// `API_PollTimeout`.
pub fn wait_while_state<P: DeviceProxy + ?Sized>(
    proxy: &mut P,
    state: DevState,
    config: &PollConfig,
) -> DevResult<DevState> {
    let start = Instant::now();
    let mut interval = config.first_interval();
    let mut polls = 0u64;

    loop {
        let current = proxy.state()?;
        polls += 1;
        if current != state {
            trace!("{} left {} after {} polls", proxy.name(), state, polls);
            return Ok(current);
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(DevFailed::new(
                reasons::POLL_TIMEOUT,
                format!(
                    "Device {} still {} after {} ms",
                    proxy.name(),
                    state,
                    elapsed.as_millis()
                ),
                "poll::wait_while_state",
            ));
        }

        std::thread::sleep(interval.min(config.timeout - elapsed));
        interval = config.next_interval(interval);
    }
}
