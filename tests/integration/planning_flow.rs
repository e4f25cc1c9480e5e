use std::time::Duration as StdDuration;

use chrono::Utc;
use dayshape_app_lib::config::PlannerConfig;
use dayshape_app_lib::db::DbPool;
use dayshape_app_lib::models::fixed_event::FixedEventCreateInput;
use dayshape_app_lib::models::task::TaskCreateInput;
use dayshape_app_lib::services::apply_pipeline::ApplyRequest;
use dayshape_app_lib::services::fallback_scheduler::FALLBACK_REASON;
use dayshape_app_lib::services::plan_session::PlanSource;
use dayshape_app_lib::services::planning_service::{PlanRequest, PlanningService};
use dayshape_app_lib::services::task_service::TaskService;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::tempdir;

fn config_for(base_url: String) -> PlannerConfig {
    PlannerConfig {
        solver_base_url: base_url,
        solver_timeout: StdDuration::from_secs(2),
        ..PlannerConfig::default()
    }
}

fn monday_request(user_id: &str) -> PlanRequest {
    PlanRequest {
        user_id: user_id.into(),
        date: "2025-05-05".into(),
        timezone: "UTC".into(),
    }
}

#[tokio::test]
async fn solver_plan_is_diffed_critiqued_and_applied() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("planning.sqlite")).expect("db pool");
    let tasks = TaskService::new(pool.clone());

    let report = tasks
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "Write report".into(),
            priority: Some("high".into()),
            duration_min: Some(60),
            ..Default::default()
        })
        .expect("create report");
    let review = tasks
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "Review PRs".into(),
            priority: Some("low".into()),
            duration_min: Some(30),
            ..Default::default()
        })
        .expect("create review");
    let standup = tasks
        .create_fixed_event(FixedEventCreateInput {
            user_id: "u1".into(),
            title: "Standup".into(),
            start_at: "2025-05-05T10:00:00Z".into(),
            end_at: "2025-05-05T10:15:00Z".into(),
            ..Default::default()
        })
        .expect("create standup");

    let server = MockServer::start_async().await;
    let solve = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/solve")
                .json_body_partial(r#"{"date": "2025-05-05", "timezone": "UTC"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "success": true,
                    "proposed_events": [
                        {
                            "block_type": "task",
                            "task_id": report.id,
                            "title": "Write report",
                            "start": "2025-05-05T09:00:00Z",
                            "end": "2025-05-05T10:00:00Z",
                            "confidence": 0.9
                        },
                        {
                            "block_type": "buffer",
                            "title": "Buffer",
                            "start": "2025-05-05T10:00:00Z",
                            "end": "2025-05-05T10:05:00Z"
                        },
                        {
                            "block_type": "task",
                            "task_id": review.id,
                            "title": "Review PRs",
                            "start": "2025-05-05T10:05:00Z",
                            "end": "2025-05-05T10:35:00Z"
                        }
                    ],
                    "unscheduled_tasks": [],
                    "stats": {"solve_ms": 12}
                }));
        })
        .await;

    let service = PlanningService::from_config(pool.clone(), config_for(server.base_url()))
        .expect("planning service");

    let plan = service.plan(monday_request("u1")).await.expect("plan");
    solve.assert_async().await;

    assert!(plan.success);
    assert_eq!(plan.source, PlanSource::Solver);
    assert_eq!(plan.proposed_events.len(), 3);
    assert_eq!(plan.diff.added.len(), 2);
    assert_eq!(plan.diff.buffers.len(), 1);
    assert_eq!(plan.diff.summary, "2 block(s) to add");
    assert_eq!(plan.stats.task_count, 2);
    assert_eq!(plan.stats.scheduled_count, 2);
    assert_eq!(plan.stats.total_scheduled_minutes, 90);
    assert_eq!(
        plan.violations,
        vec![format!("overlap:{}:{}", review.id, standup.id)]
    );
    assert!(plan.error.is_none());
    assert!(plan.fallback_plan.is_none());

    let applied = service
        .apply(ApplyRequest {
            user_id: "u1".into(),
            idempotency_key: Some("flow-1".into()),
            events: None,
            dry_run: false,
        })
        .await
        .expect("apply");
    assert!(!applied.replayed);
    let outcome = applied.outcome.expect("outcome");
    assert_eq!(outcome.created.len(), 3);
    assert_eq!(outcome.plan_date, "2025-05-05");
    assert!(!outcome.sync.attempted);

    // A second plan for the same day sees the committed blocks.
    let replan = service.plan(monday_request("u1")).await.expect("replan");
    assert!(replan.diff.added.is_empty());
    assert!(replan.diff.moved.is_empty());
}

#[tokio::test]
async fn solver_outage_falls_back_to_greedy_plan() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("fallback.sqlite")).expect("db pool");
    let tasks = TaskService::new(pool.clone());

    for (title, priority, minutes) in [("Deep work", "high", 120), ("Email", "low", 30)] {
        tasks
            .create_task(TaskCreateInput {
                user_id: "u1".into(),
                title: title.into(),
                priority: Some(priority.into()),
                duration_min: Some(minutes),
                ..Default::default()
            })
            .expect("create task");
    }

    let server = MockServer::start_async().await;
    let solve = server
        .mock_async(|when, then| {
            when.method(POST).path("/solve");
            then.status(503).body("maintenance");
        })
        .await;

    let service = PlanningService::from_config(pool, config_for(server.base_url()))
        .expect("planning service");
    let plan = service.plan(monday_request("u1")).await.expect("plan");
    solve.assert_async().await;

    assert!(!plan.success);
    assert_eq!(plan.source, PlanSource::Fallback);
    assert_eq!(plan.error.as_ref().map(|e| e.code.as_str()), Some("SOLVER_STATUS"));

    let fallback = plan.fallback_plan.as_ref().expect("fallback plan");
    assert_eq!(fallback.blocks.len(), 2);
    assert!(fallback.unscheduled.is_empty());
    assert_eq!(fallback.blocks[0].title(), "Deep work");
    assert_eq!(fallback.blocks[0].start_at().to_rfc3339(), "2025-05-05T09:00:00+00:00");
    assert_eq!(fallback.blocks[1].start_at().to_rfc3339(), "2025-05-05T11:15:00+00:00");
    assert!(fallback
        .blocks
        .iter()
        .all(|block| block.reason() == Some(FALLBACK_REASON)));
    assert_eq!(plan.proposed_events, fallback.blocks);

    // The fallback blocks are what the session holds.
    let session = service
        .sessions()
        .get_valid("u1", Utc::now())
        .expect("session stored");
    assert_eq!(session.source, PlanSource::Fallback);
    assert_eq!(session.blocks, fallback.blocks);
}

#[tokio::test]
async fn fallback_limits_itself_to_top_tasks() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("topn.sqlite")).expect("db pool");
    let tasks = TaskService::new(pool.clone());

    let urgent = tasks
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "Urgent".into(),
            priority: Some("high".into()),
            duration_min: Some(30),
            ..Default::default()
        })
        .expect("urgent");
    let later = tasks
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "Later".into(),
            priority: Some("low".into()),
            duration_min: Some(30),
            ..Default::default()
        })
        .expect("later");

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/solve");
            then.status(200)
                .json_body(json!({"success": false, "messages": ["infeasible"]}));
        })
        .await;

    let config = PlannerConfig {
        fallback_top_n: 1,
        ..config_for(server.base_url())
    };
    let service = PlanningService::from_config(pool, config).expect("planning service");
    let plan = service.plan(monday_request("u1")).await.expect("plan");

    assert_eq!(plan.error.as_ref().map(|e| e.code.as_str()), Some("SOLVER_REJECTED"));
    let fallback = plan.fallback_plan.expect("fallback plan");
    assert_eq!(fallback.blocks.len(), 1);
    assert_eq!(fallback.blocks[0].task_id(), Some(urgent.id.as_str()));
    assert_eq!(fallback.unscheduled, vec![later.id.clone()]);
    assert_eq!(plan.unscheduled, vec![later.id]);
}

#[tokio::test]
async fn invalid_plan_input_is_rejected_before_solving() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("invalid.sqlite")).expect("db pool");

    let server = MockServer::start_async().await;
    let solve = server
        .mock_async(|when, then| {
            when.method(POST).path("/solve");
            then.status(200).json_body(json!({"proposed_events": []}));
        })
        .await;

    let service = PlanningService::from_config(pool, config_for(server.base_url()))
        .expect("planning service");

    let bad_zone = service
        .plan(PlanRequest {
            user_id: "u1".into(),
            date: "2025-05-05".into(),
            timezone: "Mars/Olympus".into(),
        })
        .await
        .expect_err("unknown zone");
    assert!(bad_zone.is_client_error());

    let bad_date = service
        .plan(PlanRequest {
            user_id: "u1".into(),
            date: "05/05/2025".into(),
            timezone: "UTC".into(),
        })
        .await
        .expect_err("bad date");
    assert!(bad_date.is_client_error());

    solve.assert_hits_async(0).await;
    assert!(service.sessions().is_empty());
}
