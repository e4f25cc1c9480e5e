use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dayshape_app_lib::config::PlannerConfig;
use dayshape_app_lib::db::DbPool;
use dayshape_app_lib::error::{AppError, AppResult, PlanSessionErrorCode};
use dayshape_app_lib::models::block::{CommittedBlock, ProposedBlock};
use dayshape_app_lib::models::idempotency::IdempotencyState;
use dayshape_app_lib::services::apply_pipeline::ApplyRequest;
use dayshape_app_lib::services::calendar_sync::{CalendarSync, SyncReceipt, WebhookCalendarSync};
use dayshape_app_lib::services::plan_session::{PlanSession, PlanSource};
use dayshape_app_lib::services::planning_service::{PlanRequest, PlanningService};
use dayshape_app_lib::services::request_assembler::SolverRequest;
use dayshape_app_lib::services::solver_gateway::{SolverClient, SolverHealth, SolverResponse};
use futures::future::join_all;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::{tempdir, TempDir};

struct FixedSolver {
    blocks: Vec<ProposedBlock>,
}

#[async_trait]
impl SolverClient for FixedSolver {
    async fn solve(&self, _request: &SolverRequest) -> AppResult<SolverResponse> {
        Ok(SolverResponse {
            success: Some(true),
            proposed_events: self.blocks.clone(),
            unscheduled_tasks: Vec::new(),
            stats: None,
            messages: Vec::new(),
        })
    }

    async fn health(&self) -> AppResult<SolverHealth> {
        Ok(SolverHealth {
            healthy: true,
            body: None,
        })
    }
}

/// Fails every second push.
struct FlakyCalendar {
    calls: AtomicUsize,
}

#[async_trait]
impl CalendarSync for FlakyCalendar {
    async fn push_block(&self, _user_id: &str, block: &CommittedBlock) -> AppResult<SyncReceipt> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call % 2 == 1 {
            return Err(AppError::calendar_sync("calendar offline"));
        }
        Ok(SyncReceipt {
            block_id: block.id.clone(),
            external_id: format!("cal-{call}"),
        })
    }
}

fn block(task_id: &str, start: &str, end: &str) -> ProposedBlock {
    serde_json::from_value(json!({
        "block_type": "task",
        "task_id": task_id,
        "title": format!("Task {task_id}"),
        "start_at": start,
        "end_at": end,
    }))
    .expect("valid block")
}

fn morning_blocks() -> Vec<ProposedBlock> {
    vec![
        block("t1", "2025-05-05T09:00:00Z", "2025-05-05T10:00:00Z"),
        block("t2", "2025-05-05T10:15:00Z", "2025-05-05T11:00:00Z"),
    ]
}

fn setup(
    blocks: Vec<ProposedBlock>,
    calendar: Option<Arc<dyn CalendarSync>>,
) -> (TempDir, DbPool, PlanningService) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("apply.sqlite")).expect("db pool");
    let config = PlannerConfig {
        calendar_sync_enabled: calendar.is_some(),
        ..PlannerConfig::default()
    };
    let service = PlanningService::new(
        pool.clone(),
        config,
        Arc::new(FixedSolver { blocks }),
        calendar,
    );
    (dir, pool, service)
}

async fn plan_monday(service: &PlanningService, user_id: &str) {
    service
        .plan(PlanRequest {
            user_id: user_id.into(),
            date: "2025-05-05".into(),
            timezone: "UTC".into(),
        })
        .await
        .expect("plan");
}

fn apply_request(user_id: &str, key: &str) -> ApplyRequest {
    ApplyRequest {
        user_id: user_id.into(),
        idempotency_key: Some(key.into()),
        events: None,
        dry_run: false,
    }
}

fn idempotency_rows(pool: &DbPool) -> i64 {
    pool.with_connection(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM idempotency_records", [], |row| row.get(0))?)
    })
    .expect("count records")
}

#[tokio::test]
async fn repeated_key_replays_recorded_outcome() {
    let (_dir, pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;

    let first = service.apply(apply_request("u1", "key-1")).await.expect("first apply");
    assert!(!first.replayed);
    let first_outcome = first.outcome.clone().expect("outcome");
    assert_eq!(first_outcome.created.len(), 2);
    assert_eq!(first_outcome.deleted_count, 0);

    let second = service.apply(apply_request("u1", "key-1")).await.expect("replay");
    assert!(second.replayed);
    assert_eq!(second.outcome_hash, first.outcome_hash);
    assert_eq!(second.outcome, Some(first_outcome));

    let committed = service
        .pipeline()
        .committed_blocks("u1", "2025-05-05")
        .expect("committed");
    assert_eq!(committed.len(), 2);
    assert_eq!(idempotency_rows(&pool), 1);

    let record = service.pipeline().record("key-1").expect("record").expect("exists");
    assert_eq!(record.state, IdempotencyState::Recorded);
    assert_eq!(record.outcome_hash, first.outcome_hash);
}

#[tokio::test]
async fn concurrent_applies_with_one_key_commit_once() {
    let (_dir, pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;

    let responses = join_all((0..6).map(|_| service.apply(apply_request("u1", "burst"))))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("all applies succeed");

    let fresh = responses.iter().filter(|response| !response.replayed).count();
    assert_eq!(fresh, 1);
    let hash = responses[0].outcome_hash.clone();
    assert!(hash.is_some());
    assert!(responses.iter().all(|response| response.outcome_hash == hash));

    assert_eq!(idempotency_rows(&pool), 1);
    let committed = service
        .pipeline()
        .committed_blocks("u1", "2025-05-05")
        .expect("committed");
    assert_eq!(committed.len(), 2);
}

#[tokio::test]
async fn new_key_replaces_the_day_atomically() {
    let (_dir, _pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;
    service.apply(apply_request("u1", "day-a")).await.expect("first");

    plan_monday(&service, "u1").await;
    let second = service.apply(apply_request("u1", "day-b")).await.expect("second");
    let outcome = second.outcome.expect("outcome");
    assert_eq!(outcome.deleted_count, 2);
    assert_eq!(outcome.created.len(), 2);

    let committed = service
        .pipeline()
        .committed_blocks("u1", "2025-05-05")
        .expect("committed");
    assert_eq!(committed.len(), 2);
    assert!(committed.iter().all(|block| block.idempotency_key == "day-b"));
}

#[tokio::test]
async fn missing_and_expired_sessions_are_rejected() {
    let (_dir, pool, service) = setup(morning_blocks(), None);

    let missing = service
        .apply(apply_request("u1", "no-session"))
        .await
        .expect_err("no session");
    assert_eq!(missing.session_code(), Some(PlanSessionErrorCode::Missing));

    service
        .sessions()
        .put(PlanSession {
            user_id: "u1".into(),
            date: "2025-05-05".into(),
            timezone: "UTC".into(),
            blocks: morning_blocks(),
            source: PlanSource::Solver,
            created_at: Utc::now() - Duration::minutes(10),
        })
        .expect("put session");
    let expired = service
        .apply(apply_request("u1", "stale"))
        .await
        .expect_err("expired session");
    assert_eq!(expired.session_code(), Some(PlanSessionErrorCode::Expired));

    // A fresh plan that ages past the ttl expires the same way.
    plan_monday(&service, "u1").await;
    let later = Utc::now() + Duration::minutes(6);
    let aged = service
        .apply_at(apply_request("u1", "aged"), later)
        .await
        .expect_err("aged session");
    assert_eq!(aged.session_code(), Some(PlanSessionErrorCode::Expired));

    assert_eq!(idempotency_rows(&pool), 0);
}

#[tokio::test]
async fn dry_run_never_touches_storage() {
    let (_dir, pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;

    let preview = service
        .apply(ApplyRequest {
            dry_run: true,
            ..apply_request("u1", "preview")
        })
        .await
        .expect("dry run");
    assert!(preview.dry_run);
    assert_eq!(preview.would_create, Some(2));
    assert_eq!(preview.diff.as_ref().map(|diff| diff.added.len()), Some(2));
    assert!(preview.outcome.is_none());

    assert_eq!(idempotency_rows(&pool), 0);
    assert!(service.pipeline().record("preview").expect("lookup").is_none());
    assert!(service
        .pipeline()
        .committed_blocks("u1", "2025-05-05")
        .expect("committed")
        .is_empty());

    // The key stays usable for the real apply.
    let applied = service.apply(apply_request("u1", "preview")).await.expect("apply");
    assert!(!applied.replayed);
}

#[tokio::test]
async fn overlapping_candidates_are_rejected_before_commit() {
    let (_dir, pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;

    let error = service
        .apply(ApplyRequest {
            events: Some(vec![
                block("t1", "2025-05-05T09:00:00Z", "2025-05-05T12:00:00Z"),
                block("t2", "2025-05-05T10:00:00Z", "2025-05-05T10:30:00Z"),
                block("t3", "2025-05-05T11:00:00Z", "2025-05-05T11:30:00Z"),
            ]),
            ..apply_request("u1", "overlap")
        })
        .await
        .expect_err("overlap rejected");
    assert!(matches!(error, AppError::Conflict { .. }));
    assert_eq!(idempotency_rows(&pool), 0);

    let inverted = service
        .apply(ApplyRequest {
            events: Some(vec![block("t1", "2025-05-05T10:00:00Z", "2025-05-05T09:00:00Z")]),
            ..apply_request("u1", "inverted")
        })
        .await
        .expect_err("inverted window");
    assert!(matches!(inverted, AppError::Validation { .. }));
}

#[tokio::test]
async fn missing_key_is_a_validation_error() {
    let (_dir, _pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;

    let error = service
        .apply(ApplyRequest {
            user_id: "u1".into(),
            idempotency_key: Some("   ".into()),
            events: None,
            dry_run: false,
        })
        .await
        .expect_err("blank key");
    assert!(matches!(error, AppError::Validation { .. }));
}

#[tokio::test]
async fn key_reused_by_another_user_conflicts() {
    let (_dir, _pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;
    plan_monday(&service, "u2").await;

    service.apply(apply_request("u1", "shared")).await.expect("u1 apply");
    let error = service
        .apply(apply_request("u2", "shared"))
        .await
        .expect_err("foreign key");
    assert!(matches!(error, AppError::Conflict { .. }));
    assert!(service
        .pipeline()
        .committed_blocks("u2", "2025-05-05")
        .expect("committed")
        .is_empty());
}

#[tokio::test]
async fn calendar_failures_are_reported_but_blocks_stay_committed() {
    let calendar: Arc<dyn CalendarSync> = Arc::new(FlakyCalendar {
        calls: AtomicUsize::new(0),
    });
    let (_dir, _pool, service) = setup(morning_blocks(), Some(calendar));
    plan_monday(&service, "u1").await;

    let applied = service.apply(apply_request("u1", "sync-1")).await.expect("apply");
    let outcome = applied.outcome.expect("outcome");
    assert!(outcome.sync.attempted);
    assert_eq!(outcome.sync.receipts.len(), 1);
    assert_eq!(outcome.sync.failures.len(), 1);
    assert_eq!(
        service
            .pipeline()
            .committed_blocks("u1", "2025-05-05")
            .expect("committed")
            .len(),
        2
    );
}

#[tokio::test]
async fn webhook_calendar_receives_each_block() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/calendar")
                .json_body_partial(r#"{"user_id": "u1"}"#);
            then.status(201).json_body(json!({"id": "evt-42"}));
        })
        .await;

    let calendar: Arc<dyn CalendarSync> = Arc::new(
        WebhookCalendarSync::try_new(&server.url("/calendar"), std::time::Duration::from_secs(2))
            .expect("webhook client"),
    );
    let (_dir, _pool, service) = setup(morning_blocks(), Some(calendar));
    plan_monday(&service, "u1").await;

    let applied = service.apply(apply_request("u1", "hook-1")).await.expect("apply");
    let sync = applied.outcome.expect("outcome").sync;
    assert_eq!(sync.receipts.len(), 2);
    assert!(sync.failures.is_empty());
    assert!(sync.receipts.iter().all(|receipt| receipt.external_id == "evt-42"));
    hook.assert_hits_async(2).await;
}

#[tokio::test]
async fn disabled_sync_never_calls_the_calendar() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("nosync.sqlite")).expect("db pool");
    let calendar = Arc::new(FlakyCalendar {
        calls: AtomicUsize::new(0),
    });
    let service = PlanningService::new(
        pool,
        PlannerConfig::default(),
        Arc::new(FixedSolver {
            blocks: morning_blocks(),
        }),
        Some(calendar.clone() as Arc<dyn CalendarSync>),
    );
    plan_monday(&service, "u1").await;

    let applied = service.apply(apply_request("u1", "quiet")).await.expect("apply");
    assert!(!applied.outcome.expect("outcome").sync.attempted);
    assert_eq!(calendar.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blocks_outside_the_plan_day_are_rejected() {
    let tuesday_block = block("t1", "2025-05-06T09:00:00Z", "2025-05-06T10:00:00Z");
    let (_dir, pool, service) = setup(vec![tuesday_block], None);

    plan_monday(&service, "u1").await;
    let error = service
        .apply(apply_request("u1", "monday"))
        .await
        .expect_err("tuesday block under monday");
    assert!(matches!(error, AppError::Validation { .. }));
    assert_eq!(idempotency_rows(&pool), 0);

    let spill = service
        .apply(ApplyRequest {
            events: Some(vec![block("t2", "2025-05-05T23:30:00Z", "2025-05-06T00:30:00Z")]),
            ..apply_request("u1", "spill")
        })
        .await
        .expect_err("block crossing midnight");
    assert!(matches!(spill, AppError::Validation { .. }));

    service
        .plan(PlanRequest {
            user_id: "u1".into(),
            date: "2025-05-06".into(),
            timezone: "UTC".into(),
        })
        .await
        .expect("plan tuesday");
    service.apply(apply_request("u1", "tuesday")).await.expect("tuesday apply");

    let rows: Vec<(String, String)> = pool
        .with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT plan_date, start_at FROM committed_blocks")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .expect("committed rows");
    assert_eq!(rows, vec![("2025-05-06".to_string(), "2025-05-06T09:00:00Z".to_string())]);
}

#[tokio::test]
async fn plan_day_follows_the_session_timezone() {
    let (_dir, _pool, service) = setup(morning_blocks(), None);
    service
        .sessions()
        .put(PlanSession {
            user_id: "u1".into(),
            date: "2025-05-05".into(),
            timezone: "Asia/Shanghai".into(),
            blocks: vec![block("t1", "2025-05-04T17:00:00Z", "2025-05-04T18:00:00Z")],
            source: PlanSource::Solver,
            created_at: Utc::now(),
        })
        .expect("put session");

    let applied = service
        .apply(apply_request("u1", "shanghai"))
        .await
        .expect("01:00 local is inside the day");
    assert_eq!(applied.outcome.expect("outcome").created.len(), 1);
}

#[tokio::test]
async fn apply_waits_for_another_writer_without_stalling_the_runtime() {
    let (_dir, pool, service) = setup(morning_blocks(), None);
    plan_monday(&service, "u1").await;

    let writer = pool.get_connection().expect("writer connection");
    writer.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");
    let release = async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        writer.execute_batch("COMMIT").expect("release write lock");
    };

    let (applied, ()) = tokio::join!(service.apply(apply_request("u1", "contended")), release);
    let applied = applied.expect("apply after the writer commits");
    assert!(!applied.replayed);
    assert_eq!(applied.outcome.expect("outcome").created.len(), 2);
}

#[tokio::test]
async fn webhook_rejections_are_reported_per_block() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/calendar");
            then.status(500).body("calendar down");
        })
        .await;

    let calendar: Arc<dyn CalendarSync> = Arc::new(
        WebhookCalendarSync::try_new(&server.url("/calendar"), std::time::Duration::from_secs(2))
            .expect("webhook client"),
    );
    let (_dir, _pool, service) = setup(morning_blocks(), Some(calendar));
    plan_monday(&service, "u1").await;

    let applied = service.apply(apply_request("u1", "hook-down")).await.expect("apply");
    let sync = applied.outcome.expect("outcome").sync;
    assert!(sync.receipts.is_empty());
    assert_eq!(sync.failures.len(), 2);
    assert!(sync
        .failures
        .iter()
        .all(|failure| failure.message == "日历同步失败: 日历 Webhook 返回错误状态码 500"));
    hook.assert_hits_async(2).await;
}
