pub mod apply_pipeline;
pub mod calendar_sync;
pub mod diff_engine;
pub mod fallback_scheduler;
pub mod learning_loop;
pub mod plan_session;
pub mod planning_service;
pub mod preference_resolver;
pub mod request_assembler;
pub mod schedule_utils;
pub mod solver_gateway;
pub mod task_service;

use crate::error::{AppError, AppResult};

/// Runs synchronous storage work on the blocking thread pool.
pub(crate) async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> AppResult<T> + Send + 'static,
) -> AppResult<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::other(format!("任务执行失败: {err}")))?
}
