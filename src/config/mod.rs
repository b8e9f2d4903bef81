//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::game::MatchRules;
use crate::util::rate_limit::STORE_RATE_LIMIT;
use crate::util::retry::RetryPolicy;
use crate::util::time::DEFAULT_ROUND_TIMEOUT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub store: StoreConfig,
    pub identity: IdentityConfig,
    pub sync: SyncConfig,
    pub lifecycle: LifecycleConfig,
    /// Fight rules for matches this client hosts. Joined matches use the host's.
    pub rules: MatchRules,
    /// Fixed seed for the practice opponent; random when unset
    pub practice_seed: Option<u64>,
}

/// Hosted store connection
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Supabase project; `None` runs against the in-memory store
    pub supabase: Option<SupabaseConfig>,
    pub requests_per_second: u32,
    /// Upper bound on any single store call
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Service role key (bypasses RLS)
    pub service_role_key: String,
}

/// Where the local player's id comes from
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    /// Supabase JWT secret for token verification
    pub jwt_secret: Option<String>,
    /// Signed-in player's access token
    pub session_token: Option<String>,
}

/// Synchronization engine timing
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// How often polling stores re-read the document
    pub poll_interval: Duration,
    /// Selection window per round
    pub round_timeout: Duration,
    /// Extra wait for the opponent after the window closes
    pub opponent_grace: Duration,
    pub write_retry: RetryPolicy,
    /// Reads may keep failing this long before the match is aborted
    pub read_failure_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// How long a host waits for a challenger
    pub join_timeout: Duration,
    /// Unfinished documents older than this are replaced on create
    pub stale_match_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store: StoreConfig::default(),
            identity: IdentityConfig::default(),
            sync: SyncConfig::default(),
            lifecycle: LifecycleConfig::default(),
            rules: MatchRules::default(),
            practice_seed: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            supabase: None,
            requests_per_second: STORE_RATE_LIMIT,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            opponent_grace: Duration::from_secs(3),
            write_retry: RetryPolicy::default(),
            read_failure_timeout: Duration::from_secs(20),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(120),
            stale_match_after: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any name -> value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        let defaults = Config::default();

        let supabase = match (vars.string("SUPABASE_URL"), vars.string("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                service_role_key,
            }),
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (None, None) => None,
        };

        let write_retry = RetryPolicy {
            attempts: vars.parse("WRITE_RETRY_ATTEMPTS", defaults.sync.write_retry.attempts)?,
            initial_backoff: Duration::from_millis(vars.parse(
                "WRITE_RETRY_BACKOFF_MS",
                defaults.sync.write_retry.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(vars.parse(
                "WRITE_RETRY_MAX_BACKOFF_MS",
                defaults.sync.write_retry.max_backoff.as_millis() as u64,
            )?),
        };

        let rules = MatchRules {
            max_health: vars.parse("MAX_HEALTH", defaults.rules.max_health)?,
            max_rounds: match vars.parse("MAX_ROUNDS", 0u32)? {
                0 => None,
                n => Some(n),
            },
            boost_min: vars.parse("BOOST_MIN", defaults.rules.boost_min)?,
            boost_max: vars.parse("BOOST_MAX", defaults.rules.boost_max)?,
            boost_gain: vars.parse("BOOST_GAIN", defaults.rules.boost_gain)?,
            boost_loss: vars.parse("BOOST_LOSS", defaults.rules.boost_loss)?,
            speed_per_boost: vars.parse("SPEED_PER_BOOST", defaults.rules.speed_per_boost)?,
            opening_boost: defaults.rules.opening_boost,
        };
        if rules.max_health == 0 {
            return Err(ConfigError::Invalid("MAX_HEALTH"));
        }
        if rules.boost_min > rules.boost_max {
            return Err(ConfigError::Invalid("BOOST_MIN"));
        }

        let config = Self {
            log_level: vars.string("LOG_LEVEL").unwrap_or(defaults.log_level),
            store: StoreConfig {
                supabase,
                requests_per_second: vars
                    .parse("STORE_REQUESTS_PER_SECOND", defaults.store.requests_per_second)?,
                request_timeout: vars.millis("REQUEST_TIMEOUT_MS", defaults.store.request_timeout)?,
            },
            identity: IdentityConfig {
                jwt_secret: vars.string("SUPABASE_JWT_SECRET"),
                session_token: vars.string("PLAYER_SESSION_TOKEN"),
            },
            sync: SyncConfig {
                poll_interval: vars.millis("POLL_INTERVAL_MS", defaults.sync.poll_interval)?,
                round_timeout: vars.secs("ROUND_TIMEOUT_SECS", defaults.sync.round_timeout)?,
                opponent_grace: vars.millis("OPPONENT_GRACE_MS", defaults.sync.opponent_grace)?,
                write_retry,
                read_failure_timeout: vars
                    .secs("READ_FAILURE_TIMEOUT_SECS", defaults.sync.read_failure_timeout)?,
            },
            lifecycle: LifecycleConfig {
                join_timeout: vars.secs("JOIN_TIMEOUT_SECS", defaults.lifecycle.join_timeout)?,
                stale_match_after: vars
                    .secs("STALE_MATCH_AFTER_SECS", defaults.lifecycle.stale_match_after)?,
            },
            rules,
            practice_seed: vars.optional("PRACTICE_SEED")?,
        };

        if config.sync.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("POLL_INTERVAL_MS"));
        }
        if config.sync.round_timeout.is_zero() {
            return Err(ConfigError::Invalid("ROUND_TIMEOUT_SECS"));
        }

        Ok(config)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn optional<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        self.string(name)
            .map(|v| v.parse().map_err(|_| ConfigError::Invalid(name)))
            .transpose()
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(name)?.unwrap_or(default))
    }

    fn millis(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional(name)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional(name)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
