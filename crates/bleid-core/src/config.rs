//! Configuration for the identity coordinator
//!
//! All structures are serde-serializable so they can be layered from files
//! and environment variables by the application.

use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Privacy Configuration
// ----------------------------------------------------------------------------

/// Privacy and identity table settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Use private addresses and rotate them on a timer
    pub privacy_enabled: bool,
    /// Interval between private address rotations
    pub rpa_timeout: Duration,
    /// Maximum number of local identities, including the default identity
    pub max_identities: usize,
    /// Number of entries the controller resolving list can hold
    pub resolving_list_size: usize,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            privacy_enabled: true,
            rpa_timeout: Duration::from_secs(900), // 15 minutes
            max_identities: 4,
            resolving_list_size: 8,
        }
    }
}

impl PrivacyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_privacy(mut self, enabled: bool) -> Self {
        self.privacy_enabled = enabled;
        self
    }

    pub fn with_rpa_timeout(mut self, timeout: Duration) -> Self {
        self.rpa_timeout = timeout;
        self
    }

    pub fn with_max_identities(mut self, max: usize) -> Self {
        self.max_identities = max;
        self
    }

    pub fn with_resolving_list_size(mut self, size: usize) -> Self {
        self.resolving_list_size = size;
        self
    }
}

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Exponential backoff for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

// ----------------------------------------------------------------------------
// Coordinator Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the identity coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub privacy: PrivacyConfig,
    /// Backoff applied when the random source is temporarily unavailable
    pub random_retry: RetryPolicy,
    /// Time allowed for a single controller command
    pub command_timeout: Duration,
    /// How often the rotation timer checks for elapsed deadlines
    pub rotation_check_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            privacy: PrivacyConfig::default(),
            random_retry: RetryPolicy::default(),
            command_timeout: Duration::from_secs(10),
            rotation_check_interval: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with short timeouts and no backoff, for tests
    pub fn testing() -> Self {
        Self {
            privacy: PrivacyConfig::default(),
            random_retry: RetryPolicy::immediate(3),
            command_timeout: Duration::from_millis(200),
            rotation_check_interval: Duration::from_millis(10),
        }
    }

    pub fn with_privacy(mut self, privacy: PrivacyConfig) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_random_retry(mut self, retry: RetryPolicy) -> Self {
        self.random_retry = retry;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_rotation_check_interval(mut self, interval: Duration) -> Self {
        self.rotation_check_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(40));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"privacy": {"max_identities": 2}}"#).unwrap();
        assert_eq!(config.privacy.max_identities, 2);
        assert!(config.privacy.privacy_enabled);
        assert_eq!(config.command_timeout, Duration::from_secs(10));
    }
}
