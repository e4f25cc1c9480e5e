use std::sync::Arc;

use async_trait::async_trait;
use dayshape_app_lib::config::PlannerConfig;
use dayshape_app_lib::db::DbPool;
use dayshape_app_lib::error::{AppError, AppResult, SolverErrorCode};
use dayshape_app_lib::models::preferences::{StoredPreferences, WEIGHT_DEEP_WORK_MORNING};
use dayshape_app_lib::models::task::{Energy, TaskCreateInput};
use dayshape_app_lib::models::telemetry::TelemetryKind;
use dayshape_app_lib::services::learning_loop::LearningOutcome;
use dayshape_app_lib::services::planning_service::{PlanningService, TelemetryInput};
use dayshape_app_lib::services::request_assembler::SolverRequest;
use dayshape_app_lib::services::solver_gateway::{SolverClient, SolverHealth, SolverResponse};
use dayshape_app_lib::services::task_service::TaskService;
use serde_json::json;
use tempfile::{tempdir, TempDir};

struct OfflineSolver;

#[async_trait]
impl SolverClient for OfflineSolver {
    async fn solve(&self, _request: &SolverRequest) -> AppResult<SolverResponse> {
        Err(AppError::solver(SolverErrorCode::Unreachable, "offline"))
    }

    async fn health(&self) -> AppResult<SolverHealth> {
        Ok(SolverHealth {
            healthy: false,
            body: None,
        })
    }
}

fn setup() -> (TempDir, DbPool, PlanningService) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("telemetry.sqlite")).expect("db pool");
    let service = PlanningService::new(
        pool.clone(),
        PlannerConfig::default(),
        Arc::new(OfflineSolver),
        None,
    );
    (dir, pool, service)
}

fn stored_weight(service: &PlanningService, user_id: &str) -> f64 {
    service
        .preferences(user_id)
        .expect("preferences")
        .weights
        .get(WEIGHT_DEEP_WORK_MORNING)
        .copied()
        .expect("weight present")
}

#[test]
fn morning_move_of_deep_task_nudges_weight_up() {
    let (_dir, pool, service) = setup();
    service
        .update_preferences("u1", StoredPreferences::default())
        .expect("seed preferences");
    let task = TaskService::new(pool)
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "Architecture doc".into(),
            energy: Some(Energy::Deep),
            ..Default::default()
        })
        .expect("task");

    let ack = service
        .ingest_telemetry(TelemetryInput {
            user_id: "u1".into(),
            kind: "block_moved".into(),
            payload: json!({
                "task_id": task.id,
                "new_start": "2025-05-05T08:30:00+08:00",
            }),
            occurred_at: Some("2025-05-05T00:31:00Z".into()),
        })
        .expect("telemetry");

    assert!(ack.weights_changed);
    assert_eq!(ack.kind, TelemetryKind::BlockMoved);
    match &ack.learning {
        LearningOutcome::Updated {
            previous, current, ..
        } => {
            assert!((previous - 0.6).abs() < 1e-9);
            assert!((current - 0.64).abs() < 1e-9);
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert!((stored_weight(&service, "u1") - 0.64).abs() < 1e-9);
}

#[test]
fn repeated_signals_stay_bounded() {
    let (_dir, _pool, service) = setup();
    service
        .update_preferences("u1", StoredPreferences::default())
        .expect("seed preferences");

    for _ in 0..50 {
        service
            .ingest_telemetry(TelemetryInput {
                user_id: "u1".into(),
                kind: "user_moved_block".into(),
                payload: json!({"energy": "deep", "new_start_dt": "2025-05-05T07:00:00Z"}),
                occurred_at: None,
            })
            .expect("telemetry");
    }

    let weight = stored_weight(&service, "u1");
    assert!(weight <= 1.0);
    assert!(weight > 0.6);
    assert_eq!(service.telemetry_events("u1").expect("events").len(), 50);
}

#[test]
fn non_learning_events_are_kept_without_changing_weights() {
    let (_dir, _pool, service) = setup();
    service
        .update_preferences("u1", StoredPreferences::default())
        .expect("seed preferences");

    let completed = service
        .ingest_telemetry(TelemetryInput {
            user_id: "u1".into(),
            kind: "task_completed".into(),
            payload: json!({"task_id": "t1"}),
            occurred_at: None,
        })
        .expect("completed");
    assert!(!completed.weights_changed);

    let afternoon = service
        .ingest_telemetry(TelemetryInput {
            user_id: "u1".into(),
            kind: "block_moved".into(),
            payload: json!({"energy": "deep", "new_start": "2025-05-05T15:00:00Z"}),
            occurred_at: None,
        })
        .expect("afternoon");
    assert!(!afternoon.weights_changed);

    let light = service
        .ingest_telemetry(TelemetryInput {
            user_id: "u1".into(),
            kind: "block_moved".into(),
            payload: json!({"energy": "light", "new_start": "2025-05-05T08:00:00Z"}),
            occurred_at: None,
        })
        .expect("light");
    assert!(!light.weights_changed);

    assert!((stored_weight(&service, "u1") - 0.6).abs() < 1e-9);
    assert_eq!(service.telemetry_events("u1").expect("events").len(), 3);
}

#[test]
fn learning_failures_do_not_lose_the_event() {
    let (_dir, _pool, service) = setup();
    service
        .update_preferences("u1", StoredPreferences::default())
        .expect("seed preferences");

    let ack = service
        .ingest_telemetry(TelemetryInput {
            user_id: "u1".into(),
            kind: "block_moved".into(),
            payload: json!({"energy": "deep", "new_start": "yesterday morning"}),
            occurred_at: None,
        })
        .expect("telemetry accepted");

    assert!(!ack.weights_changed);
    assert!(matches!(ack.learning, LearningOutcome::Skipped { .. }));
    let events = service.telemetry_events("u1").expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, ack.event_id);
}

#[test]
fn users_without_stored_preferences_are_not_created_by_learning() {
    let (_dir, _pool, service) = setup();

    let ack = service
        .ingest_telemetry(TelemetryInput {
            user_id: "fresh".into(),
            kind: "block_moved".into(),
            payload: json!({"energy": "deep", "new_start": "2025-05-05T08:00:00Z"}),
            occurred_at: None,
        })
        .expect("telemetry");
    assert!(!ack.weights_changed);
    assert!(service.resolver().stored("fresh").expect("lookup").is_none());
}

#[test]
fn telemetry_accepts_legacy_field_names() {
    let (_dir, _pool, service) = setup();
    let input: TelemetryInput = serde_json::from_value(json!({
        "user_id": "u1",
        "event_type": "lateness",
        "data": {"minutes": 12}
    }))
    .expect("legacy payload");

    let ack = service.ingest_telemetry(input).expect("telemetry");
    assert_eq!(ack.kind, TelemetryKind::LatenessObserved);

    let events = service.telemetry_events("u1").expect("events");
    assert_eq!(events[0].payload, json!({"minutes": 12}));
}

#[test]
fn telemetry_requires_user_and_kind() {
    let (_dir, _pool, service) = setup();
    let error = service
        .ingest_telemetry(TelemetryInput {
            user_id: " ".into(),
            kind: "block_moved".into(),
            payload: json!({}),
            occurred_at: None,
        })
        .expect_err("missing user");
    assert!(matches!(error, AppError::Validation { .. }));
}
