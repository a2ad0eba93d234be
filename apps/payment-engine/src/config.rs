// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! by the payment engine. Configuration is loaded from the environment once
//! at startup via [`EngineConfig::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PAYMENT_REMOTE_URL` | Base URL of the wallet server API | `https://api.relational.network/_/api/1.0/` |
//! | `PAYMENT_HTTP_TIMEOUT_SECS` | Per-request timeout for remote calls | `15` |
//! | `PAYMENT_BATCH_TIMEOUT_SECS` | Default overall deadline for a batch | `30` |
//! | `PAYMENT_BATCH_POLL_SECS` | Deadline check interval while waiting on confirmations | `5` |
//! | `PAYMENT_AUTOCLAIM_SNOOZE_SECS` | Auto-claim back-off when the lock is busy | `120` |
//! | `PAYMENT_BASE_FEE` | Base fee per operation, in stroops | `100` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::time::Duration;

/// Environment variable name for the wallet server base URL.
pub const REMOTE_URL_ENV: &str = "PAYMENT_REMOTE_URL";

/// Environment variable name for the HTTP request timeout (seconds).
pub const HTTP_TIMEOUT_ENV: &str = "PAYMENT_HTTP_TIMEOUT_SECS";

/// Environment variable name for the default batch deadline (seconds).
pub const BATCH_TIMEOUT_ENV: &str = "PAYMENT_BATCH_TIMEOUT_SECS";

/// Environment variable name for the batch wait poll interval (seconds).
pub const BATCH_POLL_ENV: &str = "PAYMENT_BATCH_POLL_SECS";

/// Environment variable name for the auto-claim snooze interval (seconds).
pub const AUTOCLAIM_SNOOZE_ENV: &str = "PAYMENT_AUTOCLAIM_SNOOZE_SECS";

/// Environment variable name for the base fee per operation (stroops).
pub const BASE_FEE_ENV: &str = "PAYMENT_BASE_FEE";

/// Environment variable name for the log output format.
///
/// # Values
/// - `json`: structured JSON logs (production)
/// - `pretty`: human-readable logs (development)
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default wallet server base URL.
pub const DEFAULT_REMOTE_URL: &str = "https://api.relational.network/_/api/1.0/";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_AUTOCLAIM_SNOOZE: Duration = Duration::from_secs(120);
pub const DEFAULT_BASE_FEE: u32 = 100;

/// Capacity of the background account refresh queue.
pub const REFRESH_QUEUE_CAPACITY: usize = 100;

/// How long `refresh_async` waits for queue space before giving up.
pub const REFRESH_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Accounts refreshed more recently than this are skipped by the background refresher.
pub const BACKGROUND_REFRESH_MIN_AGE: Duration = Duration::from_secs(120);

/// Pending transactions and in-use seqnos older than this are pruned on a forced refresh.
pub const PENDING_TX_MAX_AGE: Duration = Duration::from_secs(30);

/// Runtime configuration for the payment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub remote_url: String,
    pub http_timeout: Duration,
    pub batch_timeout: Duration,
    pub batch_poll_interval: Duration,
    pub autoclaim_snooze: Duration,
    pub base_fee: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            batch_poll_interval: DEFAULT_BATCH_POLL_INTERVAL,
            autoclaim_snooze: DEFAULT_AUTOCLAIM_SNOOZE,
            base_fee: DEFAULT_BASE_FEE,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// unset, empty or unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |name: &str, default: Duration| {
            get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            remote_url: get(REMOTE_URL_ENV).unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string()),
            http_timeout: secs(HTTP_TIMEOUT_ENV, DEFAULT_HTTP_TIMEOUT),
            batch_timeout: secs(BATCH_TIMEOUT_ENV, DEFAULT_BATCH_TIMEOUT),
            batch_poll_interval: secs(BATCH_POLL_ENV, DEFAULT_BATCH_POLL_INTERVAL),
            autoclaim_snooze: secs(AUTOCLAIM_SNOOZE_ENV, DEFAULT_AUTOCLAIM_SNOOZE),
            base_fee: get(BASE_FEE_ENV)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BASE_FEE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.batch_poll_interval, Duration::from_secs(5));
        assert_eq!(config.autoclaim_snooze, Duration::from_secs(120));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (REMOTE_URL_ENV, " http://localhost:9000/api/ "),
            (BATCH_TIMEOUT_ENV, "90"),
            (BASE_FEE_ENV, "250"),
        ]));
        assert_eq!(config.remote_url, "http://localhost:9000/api/");
        assert_eq!(config.batch_timeout, Duration::from_secs(90));
        assert_eq!(config.base_fee, 250);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (BATCH_POLL_ENV, "soon"),
            (AUTOCLAIM_SNOOZE_ENV, "0"),
            (BASE_FEE_ENV, "-1"),
            (REMOTE_URL_ENV, "   "),
        ]));
        assert_eq!(config.batch_poll_interval, DEFAULT_BATCH_POLL_INTERVAL);
        assert_eq!(config.autoclaim_snooze, DEFAULT_AUTOCLAIM_SNOOZE);
        assert_eq!(config.base_fee, DEFAULT_BASE_FEE);
        assert_eq!(config.remote_url, DEFAULT_REMOTE_URL);
    }
}
