use crate::config::RateLimitConfig;
use crate::error::{KbError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How often expired buckets are swept out of the map
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Outcome of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed {
        /// Admissions left in the current window
        remaining: u32,
        /// Seconds until the window resets
        reset_after_secs: u64,
    },
    Denied {
        retry_after_secs: u64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    /// Convert a denial into `KbError::RateLimited` for `?` propagation
    pub fn into_result(self) -> Result<()> {
        match self {
            Admission::Allowed { .. } => Ok(()),
            Admission::Denied { retry_after_secs } => Err(KbError::RateLimited { retry_after_secs }),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    count: u32,
    window: Duration,
}

impl Bucket {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }
}

struct LimiterState {
    buckets: HashMap<String, Bucket>,
    last_cleanup: Instant,
}

/// Fixed-window rate limiter shared by every caller of a key.
///
/// Check-and-increment happens under a single mutex, so two callers racing
/// for the last slot of a bucket can never both be admitted. The lock is
/// never held across an await point.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    configs: HashMap<String, RateLimitConfig>,
}

impl RateLimiter {
    /// Create a limiter with the named configurations from `[rate_limits.*]`
    pub fn new(configs: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
            configs,
        }
    }

    /// Look up a named configuration
    pub fn config(&self, name: &str) -> Option<&RateLimitConfig> {
        self.configs.get(name)
    }

    /// Admit `subject` under the named configuration.
    ///
    /// The limiter key is `<key_prefix or name>:<subject>`, so the same subject
    /// is counted independently per configuration.
    pub fn admit_named(&self, config_name: &str, subject: &str) -> Result<Admission> {
        let config = self.configs.get(config_name).ok_or_else(|| {
            KbError::Config(format!("Unknown rate limit configuration: {}", config_name))
        })?;
        let prefix = config.key_prefix.as_deref().unwrap_or(config_name);
        let key = format!("{}:{}", prefix, subject);
        Ok(self.admit(&key, config))
    }

    /// Admit one operation against `key`
    pub fn admit(&self, key: &str, config: &RateLimitConfig) -> Admission {
        self.admit_at(key, config, Instant::now())
    }

    /// Admission with an explicit clock reading
    pub fn admit_at(&self, key: &str, config: &RateLimitConfig, now: Instant) -> Admission {
        let window = Duration::from_secs(config.window_seconds);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now.saturating_duration_since(state.last_cleanup) >= CLEANUP_INTERVAL {
            state.buckets.retain(|_, bucket| !bucket.expired(now));
            state.last_cleanup = now;
        }

        let bucket = state
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                window_start: now,
                count: 0,
                window,
            });

        if bucket.expired(now) || bucket.window != window {
            bucket.window_start = now;
            bucket.count = 0;
            bucket.window = window;
        }

        let elapsed = now.saturating_duration_since(bucket.window_start);
        let left = window.saturating_sub(elapsed);

        if bucket.count < config.limit {
            bucket.count += 1;
            Admission::Allowed {
                remaining: config.limit - bucket.count,
                reset_after_secs: ceil_secs(left),
            }
        } else {
            log::debug!("Rate limit hit for key {} ({} per {}s)", key, config.limit, config.window_seconds);
            Admission::Denied {
                retry_after_secs: ceil_secs(left).max(1),
            }
        }
    }

    /// Number of live buckets (expired ones are swept lazily)
    pub fn bucket_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).buckets.len()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
