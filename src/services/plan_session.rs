use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::block::ProposedBlock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Solver,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanSession {
    pub user_id: String,
    pub date: String,
    pub timezone: String,
    pub blocks: Vec<ProposedBlock>,
    pub source: PlanSource,
    pub created_at: DateTime<Utc>,
}

impl PlanSession {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

/// Latest plan per user. Bounded, last write wins, entries expire after `ttl`.
pub struct PlanSessionCache {
    entries: Mutex<LruCache<String, PlanSession>>,
    ttl: Duration,
}

impl PlanSessionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn put(&self, session: PlanSession) -> AppResult<()> {
        let mut entries = self.lock()?;
        debug!(
            target: "app::planning",
            user_id = %session.user_id,
            blocks = session.blocks.len(),
            "plan session stored"
        );
        entries.put(session.user_id.clone(), session);
        Ok(())
    }

    /// The user's session if it is still fresh at `now`. Expired entries are
    /// evicted on the way out.
    pub fn get_valid(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<PlanSession> {
        let mut entries = self.lock()?;
        let session = entries
            .get(user_id)
            .cloned()
            .ok_or_else(AppError::session_missing)?;

        if session.is_expired(now, self.ttl) {
            entries.pop(user_id);
            return Err(AppError::session_expired());
        }
        Ok(session)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, LruCache<String, PlanSession>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::other("计划缓存锁已损坏"))
    }
}
