//! Ledger configuration
//!
//! All time windows and amount limits the engine enforces. Values come from
//! [`LedgerConfig::default`] or from the CLI via `CliArgs::to_config`.

use std::time::Duration;

use crate::types::Amount;

/// Configuration for the top-up engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Minimum time between two top-up requests of one owner
    pub topup_cooldown: Duration,
    /// How long a pending top-up can be confirmed
    pub expiry_window: Duration,
    /// How often the guard sweeper runs
    pub sweep_interval: Duration,
    /// Guard entries idle for longer than this are swept
    pub guard_retention: Duration,
    /// Smallest accepted top-up amount
    pub min_topup: Amount,
    /// Largest accepted top-up amount
    pub max_topup: Amount,
    /// Longest an operation waits for the owner's lock; `None` waits forever
    pub lock_timeout: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            topup_cooldown: Duration::from_secs(30),
            expiry_window: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
            guard_retention: Duration::from_secs(60 * 60),
            min_topup: 10_000,
            max_topup: 1_000_000,
            lock_timeout: None,
        }
    }
}

impl LedgerConfig {
    /// Create a LedgerConfig with custom top-up settings
    ///
    /// Invalid values fall back to the defaults with a warning: a zero
    /// expiry window, a non-positive minimum, or a maximum below the minimum.
    /// Sweep settings keep their defaults.
    pub fn new(
        topup_cooldown: Duration,
        expiry_window: Duration,
        min_topup: Amount,
        max_topup: Amount,
    ) -> Self {
        let default = Self::default();

        let expiry_window = if expiry_window.is_zero() {
            tracing::warn!(
                default = ?default.expiry_window,
                "invalid expiry_window (0), using default"
            );
            default.expiry_window
        } else {
            expiry_window
        };

        let min_topup = if min_topup <= 0 {
            tracing::warn!(min_topup, default = default.min_topup, "invalid min_topup, using default");
            default.min_topup
        } else {
            min_topup
        };

        let max_topup = if max_topup < min_topup {
            let fallback = default.max_topup.max(min_topup);
            tracing::warn!(max_topup, min_topup, fallback, "max_topup below min_topup, using fallback");
            fallback
        } else {
            max_topup
        };

        Self {
            topup_cooldown,
            expiry_window,
            min_topup,
            max_topup,
            ..default
        }
    }

    /// Bound how long operations wait for an owner's lock
    ///
    /// A zero timeout is ignored with a warning and operations keep waiting
    /// without a deadline.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            tracing::warn!("invalid lock_timeout (0), waiting without a deadline");
            self.lock_timeout = None;
        } else {
            self.lock_timeout = Some(timeout);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.topup_cooldown, Duration::from_secs(30));
        assert_eq!(config.expiry_window, Duration::from_secs(1800));
        assert_eq!(config.guard_retention, Duration::from_secs(3600));
        assert_eq!((config.min_topup, config.max_topup), (10_000, 1_000_000));
        assert_eq!(config.lock_timeout, None);
    }

    #[test]
    fn test_with_lock_timeout() {
        let config = LedgerConfig::default().with_lock_timeout(Duration::from_millis(250));
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(250)));

        let config = LedgerConfig::default().with_lock_timeout(Duration::ZERO);
        assert_eq!(config.lock_timeout, None);
    }

    #[rstest]
    #[case::valid(Duration::from_secs(60), 5_000, 50_000, Duration::from_secs(60), 5_000, 50_000)]
    #[case::zero_expiry(Duration::ZERO, 5_000, 50_000, Duration::from_secs(1800), 5_000, 50_000)]
    #[case::negative_min(Duration::from_secs(60), -1, 50_000, Duration::from_secs(60), 10_000, 50_000)]
    #[case::max_below_min(Duration::from_secs(60), 20_000, 100, Duration::from_secs(60), 20_000, 1_000_000)]
    #[case::max_below_large_min(Duration::from_secs(60), 2_000_000, 100, Duration::from_secs(60), 2_000_000, 2_000_000)]
    fn test_new_falls_back_on_invalid_values(
        #[case] expiry: Duration,
        #[case] min: Amount,
        #[case] max: Amount,
        #[case] expected_expiry: Duration,
        #[case] expected_min: Amount,
        #[case] expected_max: Amount,
    ) {
        let config = LedgerConfig::new(Duration::from_secs(5), expiry, min, max);

        assert_eq!(config.topup_cooldown, Duration::from_secs(5));
        assert_eq!(config.expiry_window, expected_expiry);
        assert_eq!(config.min_topup, expected_min);
        assert_eq!(config.max_topup, expected_max);
    }
}
