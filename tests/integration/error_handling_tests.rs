use dayshape_app_lib::commands::CommandError;
use dayshape_app_lib::db::DbPool;
use dayshape_app_lib::error::{AppError, PlanSessionErrorCode, SolverErrorCode};
use dayshape_app_lib::models::task::TaskCreateInput;
use dayshape_app_lib::services::task_service::TaskService;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn test_command_error_codes() {
    let cases = [
        (AppError::validation("bad input"), "VALIDATION_ERROR"),
        (AppError::not_found(), "NOT_FOUND"),
        (AppError::conflict("taken"), "CONFLICT"),
        (AppError::session_missing(), "PLAN_SESSION_MISSING"),
        (AppError::session_expired(), "PLAN_SESSION_EXPIRED"),
        (AppError::solver(SolverErrorCode::HttpTimeout, "slow"), "HTTP_TIMEOUT"),
        (AppError::solver(SolverErrorCode::Unreachable, "down"), "SOLVER_UNREACHABLE"),
        (AppError::database("disk"), "UNKNOWN"),
        (AppError::other("???"), "UNKNOWN"),
    ];

    for (error, expected) in cases {
        let command: CommandError = error.into();
        assert_eq!(command.code, expected);
        assert!(!command.message.is_empty());
    }
}

#[test]
fn test_validation_details_survive_mapping() {
    let error = AppError::validation_with_details("无效的时间格式", json!({"value": "noon"}));
    let command = CommandError::from(error);
    let body = serde_json::to_value(&command).expect("serialize");

    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["details"]["value"], "noon");
}

#[test]
fn test_details_are_omitted_when_absent() {
    let body = serde_json::to_value(CommandError::from(AppError::not_found())).expect("serialize");
    assert!(body.get("details").is_none());
    assert_eq!(body["message"], "请求的资源不存在");
}

#[test]
fn test_session_errors_are_client_errors() {
    let missing = AppError::session_missing();
    assert!(missing.is_client_error());
    assert_eq!(missing.session_code(), Some(PlanSessionErrorCode::Missing));

    let solver = AppError::solver(SolverErrorCode::Rejected, "infeasible");
    assert!(!solver.is_client_error());
    assert!(solver.is_solver_unavailable());
}

#[test]
fn test_sqlite_errors_are_classified() {
    assert!(matches!(
        AppError::from(rusqlite::Error::QueryReturnedNoRows),
        AppError::NotFound
    ));

    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("errors.sqlite")).expect("db pool");
    let duplicate = pool.with_connection(|conn| {
        conn.execute(
            "INSERT INTO user_preferences (user_id, data, updated_at) VALUES ('u1', '{}', 'now')",
            [],
        )?;
        conn.execute(
            "INSERT INTO user_preferences (user_id, data, updated_at) VALUES ('u1', '{}', 'now')",
            [],
        )?;
        Ok(())
    });
    assert!(matches!(duplicate, Err(AppError::Conflict { .. })));
}

#[test]
fn test_task_intake_rejects_bad_input() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("intake.sqlite")).expect("db pool");
    let tasks = TaskService::new(pool);

    let blank_title = tasks
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "   ".into(),
            ..Default::default()
        })
        .expect_err("blank title");
    assert!(matches!(blank_title, AppError::Validation { .. }));

    let bad_deadline = tasks
        .create_task(TaskCreateInput {
            user_id: "u1".into(),
            title: "Ship".into(),
            deadline_at: Some("next friday".into()),
            ..Default::default()
        })
        .expect_err("bad deadline");
    assert!(matches!(bad_deadline, AppError::Validation { .. }));

    let missing = tasks.get_task("nope").expect_err("missing task");
    assert!(matches!(missing, AppError::NotFound));

    assert!(tasks.list_pending("u1").expect("list").is_empty());
}
