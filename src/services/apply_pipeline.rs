//! Commits a plan exactly once per idempotency key.
//!
//! Key lifecycle: no record -> `applying` -> `recorded`. The record and the
//! block replacement are written in a single IMMEDIATE transaction; the
//! record flips to `recorded` once the outcome (sync report included) is known.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::repositories::committed_block_repository::{
    CommittedBlockRepository, CommittedBlockRow,
};
use crate::db::repositories::idempotency_repository::{IdempotencyRepository, IdempotencyRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::block::{BlockType, CommittedBlock, ProposedBlock};
use crate::models::idempotency::{IdempotencyRecord, IdempotencyState};
use crate::services::calendar_sync::{push_all, CalendarSync, SyncReport};
use crate::services::diff_engine::{compute_diff, find_overlaps, PlanDiff};
use crate::services::plan_session::PlanSessionCache;
use crate::services::run_blocking;
use crate::services::schedule_utils::{
    ensure_window, local_day_bounds, now_storage, parse_plan_date, parse_timezone,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ApplyRequest {
    pub user_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<ProposedBlock>>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub block_type: BlockType,
    pub title: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
}

impl From<&CommittedBlock> for CreatedBlock {
    fn from(block: &CommittedBlock) -> Self {
        Self {
            id: block.id.clone(),
            task_id: block.task_id.clone(),
            block_type: block.block_type,
            title: block.title.clone(),
            start_at: block.start_at,
            end_at: block.end_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyOutcome {
    pub user_id: String,
    pub plan_date: String,
    pub created: Vec<CreatedBlock>,
    pub deleted_count: usize,
    pub sync: SyncReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyResponse {
    pub idempotency_key: String,
    pub dry_run: bool,
    pub replayed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApplyOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<PlanDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub would_create: Option<usize>,
}

enum ClaimResult {
    Claimed {
        deleted: usize,
        blocks: Vec<CommittedBlock>,
    },
    AlreadyRecorded(IdempotencyRow),
}

pub struct ApplyPipeline {
    db: DbPool,
    sessions: Arc<PlanSessionCache>,
    calendar: Option<Arc<dyn CalendarSync>>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ApplyPipeline {
    /// `calendar` is `Some` only when calendar sync is enabled.
    pub fn new(
        db: DbPool,
        sessions: Arc<PlanSessionCache>,
        calendar: Option<Arc<dyn CalendarSync>>,
    ) -> Self {
        Self {
            db,
            sessions,
            calendar,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn apply(&self, request: ApplyRequest, now: DateTime<Utc>) -> AppResult<ApplyResponse> {
        let user_id = request.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(AppError::validation("缺少用户标识"));
        }
        let key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::validation("缺少幂等键"))?;

        if let Some(events) = &request.events {
            for block in events {
                ensure_window(block.start_at(), block.end_at())?;
            }
        }

        if request.dry_run {
            return self.dry_run(&user_id, key, request.events, now).await;
        }

        let lock = self.user_lock(&user_id)?;
        let guard = lock.lock_owned().await;
        let result = self.apply_locked(&user_id, key, request.events, now).await;
        drop(guard);
        self.release_user_lock(&user_id);
        result
    }

    async fn apply_locked(
        &self,
        user_id: &str,
        key: String,
        events: Option<Vec<ProposedBlock>>,
        now: DateTime<Utc>,
    ) -> AppResult<ApplyResponse> {
        let db = self.db.clone();
        let lookup_key = key.clone();
        if let Some(row) = run_blocking(move || {
            db.with_connection(|conn| IdempotencyRepository::find(conn, &lookup_key))
        })
        .await?
        {
            return replay(row, user_id);
        }

        let session = self.sessions.get_valid(user_id, now)?;
        let candidates = events.unwrap_or_else(|| session.blocks.clone());
        ensure_within_day(&candidates, &session.timezone, &session.date)?;
        reject_overlaps(&candidates)?;

        let plan_date = session.date.clone();
        let db = self.db.clone();
        let (owner, claim_key, claim_date) = (user_id.to_string(), key.clone(), plan_date.clone());
        let claim = run_blocking(move || {
            commit_blocks(&db, &owner, &claim_key, &claim_date, &candidates)
        })
        .await?;
        let (deleted, blocks) = match claim {
            ClaimResult::AlreadyRecorded(row) => return replay(row, user_id),
            ClaimResult::Claimed { deleted, blocks } => (deleted, blocks),
        };

        let sync = match &self.calendar {
            Some(calendar) => push_all(calendar.as_ref(), user_id, &blocks).await,
            None => SyncReport::skipped(),
        };

        let outcome = ApplyOutcome {
            user_id: user_id.to_string(),
            plan_date,
            created: blocks.iter().map(CreatedBlock::from).collect(),
            deleted_count: deleted,
            sync,
        };
        let outcome_json = serde_json::to_string(&outcome)?;
        let hash = outcome_hash(&outcome_json);
        let db = self.db.clone();
        let (record_key, record_hash) = (key.clone(), hash.clone());
        run_blocking(move || {
            let recorded_at = now_storage();
            db.with_connection(|conn| {
                IdempotencyRepository::mark_recorded(
                    conn,
                    &record_key,
                    &record_hash,
                    &outcome_json,
                    &recorded_at,
                )
            })
        })
        .await?;

        info!(
            target: "app::apply",
            user_id = %user_id,
            key = %key,
            created = outcome.created.len(),
            deleted = outcome.deleted_count,
            sync_failures = outcome.sync.failures.len(),
            "plan applied"
        );

        Ok(ApplyResponse {
            idempotency_key: key,
            dry_run: false,
            replayed: false,
            outcome: Some(outcome),
            outcome_hash: Some(hash),
            diff: None,
            would_create: None,
        })
    }

    pub fn committed_blocks(&self, user_id: &str, plan_date: &str) -> AppResult<Vec<CommittedBlock>> {
        list_committed(&self.db, user_id, plan_date)
    }

    pub fn record(&self, key: &str) -> AppResult<Option<IdempotencyRecord>> {
        let row = self
            .db
            .with_connection(|conn| IdempotencyRepository::find(conn, key))?;
        row.map(IdempotencyRow::into_record).transpose()
    }

    /// Diff only. Never claims the key and never touches committed blocks.
    async fn dry_run(
        &self,
        user_id: &str,
        key: String,
        events: Option<Vec<ProposedBlock>>,
        now: DateTime<Utc>,
    ) -> AppResult<ApplyResponse> {
        let (candidates, plan_date) = match events {
            Some(events) => {
                let date = match self.sessions.get_valid(user_id, now) {
                    Ok(session) => session.date,
                    Err(_) => events
                        .iter()
                        .map(|block| block.start_at())
                        .min()
                        .map(|start| start.date_naive().format("%Y-%m-%d").to_string())
                        .ok_or_else(|| AppError::validation("没有可预览的时间块"))?,
                };
                (events, date)
            }
            None => {
                let session = self.sessions.get_valid(user_id, now)?;
                (session.blocks, session.date)
            }
        };

        let db = self.db.clone();
        let (owner, date) = (user_id.to_string(), plan_date.clone());
        let committed = run_blocking(move || list_committed(&db, &owner, &date)).await?;
        let diff = compute_diff(&candidates, &committed);
        debug!(
            target: "app::apply",
            user_id = %user_id,
            plan_date = %plan_date,
            candidates = candidates.len(),
            "dry run computed"
        );

        Ok(ApplyResponse {
            idempotency_key: key,
            dry_run: true,
            replayed: false,
            outcome: None,
            outcome_hash: None,
            diff: Some(diff),
            would_create: Some(candidates.len()),
        })
    }

    fn user_lock(&self, user_id: &str) -> AppResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|_| AppError::other("用户锁表已损坏"))?;
        Ok(locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Drops the user's lock entry once no apply holds or awaits it.
    fn release_user_lock(&self, user_id: &str) {
        let Ok(mut locks) = self.user_locks.lock() else {
            return;
        };
        if locks
            .get(user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(user_id);
        }
    }
}

pub(crate) fn list_committed(
    db: &DbPool,
    user_id: &str,
    plan_date: &str,
) -> AppResult<Vec<CommittedBlock>> {
    let rows = db.with_connection(|conn| {
        CommittedBlockRepository::list_for_user_date(conn, user_id, plan_date)
    })?;
    rows.into_iter().map(CommittedBlockRow::into_record).collect()
}

fn commit_blocks(
    db: &DbPool,
    user_id: &str,
    key: &str,
    plan_date: &str,
    candidates: &[ProposedBlock],
) -> AppResult<ClaimResult> {
    let created_at = now_storage();
    db.with_immediate_transaction(|tx| {
        if let Some(row) = IdempotencyRepository::find(tx, key)? {
            return Ok(ClaimResult::AlreadyRecorded(row));
        }
        IdempotencyRepository::insert_applying(tx, key, user_id, &created_at)?;

        let deleted = CommittedBlockRepository::delete_for_user_date(tx, user_id, plan_date)?;
        let mut blocks = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let block = CommittedBlock {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                plan_date: plan_date.to_string(),
                task_id: candidate.task_id().map(str::to_string),
                block_type: candidate.block_type(),
                title: candidate.title().to_string(),
                start_at: candidate.start_at(),
                end_at: candidate.end_at(),
                confidence: candidate.confidence(),
                reason: candidate.reason().map(str::to_string),
                idempotency_key: key.to_string(),
                created_at: created_at.clone(),
            };
            CommittedBlockRepository::insert(tx, &CommittedBlockRow::from_record(&block))?;
            blocks.push(block);
        }
        Ok(ClaimResult::Claimed { deleted, blocks })
    })
}

/// Every candidate must lie within the local day of the plan date.
fn ensure_within_day(candidates: &[ProposedBlock], timezone: &str, plan_date: &str) -> AppResult<()> {
    let tz = parse_timezone(timezone)?;
    let (day_start, day_end) = local_day_bounds(tz, parse_plan_date(plan_date)?)?;
    let outside: Vec<_> = candidates
        .iter()
        .filter(|block| block.start_at() < day_start || block.end_at() > day_end)
        .map(|block| {
            json!({
                "block": block.task_id().unwrap_or(block.title()),
                "start_at": block.start_at().to_rfc3339(),
                "end_at": block.end_at().to_rfc3339(),
            })
        })
        .collect();
    if outside.is_empty() {
        return Ok(());
    }
    Err(AppError::validation_with_details(
        "时间块超出规划日期范围",
        json!({
            "plan_date": plan_date,
            "timezone": timezone,
            "day_start": day_start.to_rfc3339(),
            "day_end": day_end.to_rfc3339(),
            "blocks": outside,
        }),
    ))
}

fn replay(row: IdempotencyRow, user_id: &str) -> AppResult<ApplyResponse> {
    let record = row.into_record()?;
    if record.user_id != user_id {
        return Err(AppError::conflict("幂等键已被其他用户使用"));
    }
    match record.state {
        IdempotencyState::Applying => Err(AppError::conflict("相同幂等键的应用仍在进行中")),
        IdempotencyState::Recorded => {
            let outcome = record
                .outcome
                .map(serde_json::from_value::<ApplyOutcome>)
                .transpose()?;
            info!(target: "app::apply", user_id = %user_id, key = %record.key, "replaying recorded apply");
            Ok(ApplyResponse {
                idempotency_key: record.key,
                dry_run: false,
                replayed: true,
                outcome,
                outcome_hash: record.outcome_hash,
                diff: None,
                would_create: None,
            })
        }
    }
}

fn reject_overlaps(candidates: &[ProposedBlock]) -> AppResult<()> {
    let overlaps = find_overlaps(candidates);
    if overlaps.is_empty() {
        return Ok(());
    }
    let pairs: Vec<_> = overlaps
        .iter()
        .map(|(a, b)| {
            json!({
                "first": candidates[*a].task_id().unwrap_or(candidates[*a].title()),
                "second": candidates[*b].task_id().unwrap_or(candidates[*b].title()),
            })
        })
        .collect();
    warn!(target: "app::apply", overlaps = pairs.len(), "candidate blocks overlap");
    Err(AppError::conflict(format!(
        "待提交的时间块存在重叠: {}",
        serde_json::Value::Array(pairs)
    )))
}

/// SHA-256 over the canonical JSON encoding, base64 without padding.
pub fn outcome_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    STANDARD_NO_PAD.encode(hasher.finalize())
}
