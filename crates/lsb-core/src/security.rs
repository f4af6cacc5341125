use std::time::Duration;

use tokio::time::Instant;

use crate::{cache::TtlCache, domain::UserId};

// ============== Authorization ==============

pub fn is_authorized(user_id: Option<UserId>, admin_ids: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if admin_ids.is_empty() {
        return false;
    }
    admin_ids.contains(&user_id.0)
}

// ============== Rate Limiter (per-actor counter) ==============

/// What to do with an incoming action after the limiter has counted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allow,
    /// Second action inside the window: tell the actor to wait, then drop it.
    Warn,
    /// Anything after the warning: drop without a reply.
    Drop,
}

/// Counts actions per actor inside a short window that restarts on every
/// counted action. The first action passes, the second earns a single "please
/// wait" notice, the rest are dropped until the entry expires.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    counters: TtlCache<UserId, u32>,
}

impl RateLimiter {
    pub fn new(enabled: bool, capacity: usize, window: Duration) -> Self {
        Self {
            enabled,
            counters: TtlCache::new(capacity, window),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> ThrottleDecision {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> ThrottleDecision {
        if !self.enabled {
            return ThrottleDecision::Allow;
        }

        let count = self.counters.get_at(&user_id, now).copied().unwrap_or(0);
        if count > 1 {
            return ThrottleDecision::Drop;
        }

        self.counters.insert_at(user_id, count + 1, now);
        if count == 1 {
            return ThrottleDecision::Warn;
        }
        ThrottleDecision::Allow
    }
}
