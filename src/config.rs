//! Runtime configuration for the resilient action engine.
//!
//! Every knob here can be set via environment variable with a sane
//! default, mirroring how the underlying browser layer reads things
//! like `SCREENSHOT_FULL_PAGE` from the environment rather than
//! threading a config object through every call site.

use std::time::Duration;

/// Tunable knobs that govern healing, rate limiting, and waiting behavior.
///
/// Construct with [`RuntimeConfig::from_env`] to pick up environment
/// overrides, or [`RuntimeConfig::default`] for the documented defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Time-to-live for a healing cache entry, in milliseconds.
    pub heal_ttl_ms: u64,
    /// Maximum number of entries the healing cache will hold before evicting.
    pub heal_max_entries: usize,
    /// Minimum reliability (successes / total) a cache entry must keep to stay promoted.
    pub heal_min_success_rate: f64,
    /// Maximum dispatches allowed per [`RuntimeConfig::rate_limit_window_ms`].
    pub rate_limit_n: u32,
    /// Sliding window over which `rate_limit_n` is enforced, in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Consecutive failures before the circuit breaker opens.
    pub cb_fail_threshold: u32,
    /// How long the circuit stays open before allowing a half-open probe, in milliseconds.
    pub cb_open_ms: u64,
    /// Minimum OCR confidence (0.0-1.0) accepted as a match.
    pub ocr_confidence_min: f64,
    /// Maximum time to wait for a target to become actionable, in milliseconds.
    pub actionability_timeout_ms: u64,
    /// Maximum time a conditional-click poll loop may run, in milliseconds.
    pub cond_click_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heal_ttl_ms: 24 * 60 * 60 * 1000,
            heal_max_entries: 1000,
            heal_min_success_rate: 0.7,
            rate_limit_n: 50,
            rate_limit_window_ms: 60_000,
            cb_fail_threshold: 3,
            cb_open_ms: 60_000,
            ocr_confidence_min: 0.6,
            actionability_timeout_ms: 120_000,
            cond_click_timeout_ms: 120_000,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from the documented defaults, overridden by any
    /// of the `RAE_*` environment variables that are set and parse.
    ///
    /// An env var that is present but fails to parse is ignored and
    /// the default is kept, rather than causing a startup error.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heal_ttl_ms: env_u64("RAE_HEAL_TTL_MS", defaults.heal_ttl_ms),
            heal_max_entries: env_usize("RAE_HEAL_MAX_ENTRIES", defaults.heal_max_entries),
            heal_min_success_rate: env_f64("RAE_HEAL_MIN_SUCCESS_RATE", defaults.heal_min_success_rate),
            rate_limit_n: env_u32("RAE_RATE_LIMIT_N", defaults.rate_limit_n),
            rate_limit_window_ms: env_u64("RAE_RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms),
            cb_fail_threshold: env_u32("RAE_CB_FAIL_THRESHOLD", defaults.cb_fail_threshold),
            cb_open_ms: env_u64("RAE_CB_OPEN_MS", defaults.cb_open_ms),
            ocr_confidence_min: env_f64("RAE_OCR_CONFIDENCE_MIN", defaults.ocr_confidence_min),
            actionability_timeout_ms: env_u64(
                "RAE_ACTIONABILITY_TIMEOUT_MS",
                defaults.actionability_timeout_ms,
            ),
            cond_click_timeout_ms: env_u64("RAE_COND_CLICK_TIMEOUT_MS", defaults.cond_click_timeout_ms),
        }
    }

    /// [`RuntimeConfig::heal_ttl_ms`] as a [`Duration`].
    pub fn heal_ttl(&self) -> Duration {
        Duration::from_millis(self.heal_ttl_ms)
    }

    /// [`RuntimeConfig::rate_limit_window_ms`] as a [`Duration`].
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// [`RuntimeConfig::cb_open_ms`] as a [`Duration`].
    pub fn cb_open(&self) -> Duration {
        Duration::from_millis(self.cb_open_ms)
    }

    /// [`RuntimeConfig::actionability_timeout_ms`] as a [`Duration`].
    pub fn actionability_timeout(&self) -> Duration {
        Duration::from_millis(self.actionability_timeout_ms)
    }

    /// [`RuntimeConfig::cond_click_timeout_ms`] as a [`Duration`].
    pub fn cond_click_timeout(&self) -> Duration {
        Duration::from_millis(self.cond_click_timeout_ms)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.heal_max_entries, 1000);
        assert_eq!(cfg.cb_fail_threshold, 3);
        assert_eq!(cfg.rate_limit_n, 50);
        assert_eq!(cfg.heal_ttl(), Duration::from_millis(24 * 60 * 60 * 1000));
    }

    #[test]
    fn test_env_override_parses_and_falls_back() {
        assert_eq!(env_u64("RAE_DOES_NOT_EXIST_XYZ", 42), 42);
        std::env::set_var("RAE_TEST_PARSE_U32", "7");
        assert_eq!(env_u32("RAE_TEST_PARSE_U32", 1), 7);
        std::env::set_var("RAE_TEST_PARSE_U32", "not-a-number");
        assert_eq!(env_u32("RAE_TEST_PARSE_U32", 1), 1);
        std::env::remove_var("RAE_TEST_PARSE_U32");
    }
}
