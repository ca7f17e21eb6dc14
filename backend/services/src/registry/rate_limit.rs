use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(10);

/// Cooldown flag shared by every probe made through one registry client.
/// Probes take the read lock; triggering and the clearing timer take the
/// write lock.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    limited: Arc<RwLock<bool>>,
    delay: Duration,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            limited: Arc::new(RwLock::new(false)),
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_limited(&self) -> bool {
        *self.limited.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a cooldown window that clears itself after `delay`.
    ///
    /// Only one window may be open at a time. Triggering while one is already
    /// open is a caller bug: it is logged and ignored, and `false` is returned.
    pub fn trigger_limit(&self) -> bool {
        {
            let mut limited = self.limited.write().unwrap_or_else(PoisonError::into_inner);
            if *limited {
                log::error!("Rate limit triggered while a cooldown window is already open");
                return false;
            }
            *limited = true;
        }

        log::info!("Registry rate limited, cooling down for {:?}", self.delay);

        let flag = Arc::clone(&self.limited);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            *flag.write().unwrap_or_else(PoisonError::into_inner) = false;
            log::debug!("Registry rate limit cleared");
        });

        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_DELAY)
    }
}
