#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff;
use bon::Builder;

const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_CAP_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);

/// Configuration for a session connection.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Reconnection schedule applied after unexpected closes and failed opens
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single open attempt (TCP + TLS + WebSocket handshake)
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Treat the connection as lost when nothing arrives for this long.
    /// `None` disables the watchdog.
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            idle_timeout: None,
        }
    }
}

/// Capped exponential reconnection schedule.
///
/// The delay before retry `attempt` (starting at 0) is
/// `min(base_delay * 2^attempt, cap_delay)`. After `max_attempts` retries the
/// session gives up until it is initiated again.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    #[builder(default = DEFAULT_BASE_DELAY_DURATION)]
    pub base_delay: Duration,
    /// Ceiling on any single delay
    #[builder(default = DEFAULT_CAP_DELAY_DURATION)]
    pub cap_delay: Duration,
    /// Total retries before giving up
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY_DURATION,
            cap_delay: DEFAULT_CAP_DELAY_DURATION,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }
}

impl From<ReconnectConfig> for ReconnectBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }
}

/// Deterministic [`Backoff`] over a [`ReconnectConfig`].
///
/// Holds the attempt counter: every [`Backoff::next_backoff`] call consumes one
/// attempt, [`Backoff::reset`] rewinds to zero after a successful open.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    /// Number of retries scheduled since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether every allowed retry has been scheduled.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let delay = self.config.delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}
