use tracing::{debug, info};
use uuid::Uuid;

use crate::db::repositories::fixed_event_repository::{FixedEventRepository, FixedEventRow};
use crate::db::repositories::task_repository::{TaskRepository, TaskRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::fixed_event::{FixedEventCreateInput, FixedEventRecord};
use crate::models::task::{TaskCreateInput, TaskRecord, STATUS_DONE};
use crate::services::schedule_utils::{
    ensure_window, now_storage, parse_datetime, parse_optional_datetime, to_storage,
};

const VALID_STATUSES: &[&str] = &["todo", "in_progress", STATUS_DONE];

/// Intake for the inputs a plan is assembled from: tasks and fixed events.
#[derive(Clone)]
pub struct TaskService {
    db: DbPool,
}

impl TaskService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn create_task(&self, input: TaskCreateInput) -> AppResult<TaskRecord> {
        let now = now_storage();
        let record = TaskRecord {
            id: Uuid::new_v4().to_string(),
            user_id: normalize_user_id(&input.user_id)?,
            title: normalize_title(&input.title)?,
            status: normalize_status(input.status)?,
            priority: normalize_priority(input.priority),
            energy: input.energy.unwrap_or_default(),
            duration_min: normalize_duration(input.duration_min)?,
            deadline_at: normalize_datetime_opt(input.deadline_at)?,
            earliest_start_at: normalize_datetime_opt(input.earliest_start_at)?,
            latest_end_at: normalize_datetime_opt(input.latest_end_at)?,
            hard_fixed: input.hard_fixed,
            location: normalize_optional_string(input.location),
            created_at: now.clone(),
            updated_at: now,
        };

        let row = TaskRow::from_record(&record);
        self.db
            .with_connection(|conn| TaskRepository::insert(conn, &row))?;
        info!(target: "app::task", task_id = %record.id, user_id = %record.user_id, "task created");
        Ok(record)
    }

    pub fn get_task(&self, id: &str) -> AppResult<TaskRecord> {
        let row = self
            .db
            .with_connection(|conn| TaskRepository::find_by_id(conn, id))?
            .ok_or_else(AppError::not_found)?;
        Ok(row.into_record())
    }

    pub fn complete_task(&self, id: &str) -> AppResult<TaskRecord> {
        let now = now_storage();
        self.db
            .with_connection(|conn| TaskRepository::update_status(conn, id, STATUS_DONE, &now))?;
        info!(target: "app::task", task_id = %id, "task completed");
        self.get_task(id)
    }

    pub fn list_pending(&self, user_id: &str) -> AppResult<Vec<TaskRecord>> {
        let rows = self
            .db
            .with_connection(|conn| TaskRepository::list_pending_for_user(conn, user_id))?;
        let tasks: Vec<TaskRecord> = rows.into_iter().map(TaskRow::into_record).collect();
        debug!(target: "app::task", user_id = %user_id, count = tasks.len(), "pending tasks listed");
        Ok(tasks)
    }

    pub fn create_fixed_event(&self, input: FixedEventCreateInput) -> AppResult<FixedEventRecord> {
        let start = parse_datetime(&input.start_at)?;
        let end = parse_datetime(&input.end_at)?;
        ensure_window(start, end)?;

        let record = FixedEventRecord {
            id: Uuid::new_v4().to_string(),
            user_id: normalize_user_id(&input.user_id)?,
            title: normalize_title(&input.title)?,
            start_at: to_storage(start),
            end_at: to_storage(end),
            is_blocking: input.is_blocking.unwrap_or(true),
            is_commute: input.is_commute,
            location: normalize_optional_string(input.location),
        };

        let row = FixedEventRow::from_record(&record);
        self.db
            .with_connection(|conn| FixedEventRepository::insert(conn, &row))?;
        info!(target: "app::task", event_id = %record.id, user_id = %record.user_id, "fixed event created");
        Ok(record)
    }
}

fn normalize_user_id(user_id: &str) -> AppResult<String> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("缺少用户标识"));
    }
    Ok(trimmed.to_string())
}

fn normalize_title(title: &str) -> AppResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("标题不能为空"));
    }
    if trimmed.chars().count() > 160 {
        return Err(AppError::validation("标题长度需在 160 字以内"));
    }
    Ok(trimmed.to_string())
}

fn normalize_status(status: Option<String>) -> AppResult<String> {
    let value = status.unwrap_or_else(|| "todo".to_string()).to_lowercase();
    if VALID_STATUSES.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(AppError::validation("状态取值非法"))
    }
}

/// Labels outside high/medium/low are kept verbatim and weighted as unknown.
fn normalize_priority(priority: Option<String>) -> String {
    priority
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "medium".to_string())
}

fn normalize_duration(value: Option<i64>) -> AppResult<Option<i64>> {
    match value {
        Some(minutes) if minutes <= 0 => Err(AppError::validation("任务时长必须大于 0")),
        Some(minutes) if minutes > 24 * 60 => Err(AppError::validation("任务时长不能超过一天")),
        other => Ok(other),
    }
}

fn normalize_optional_string(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn normalize_datetime_opt(value: Option<String>) -> AppResult<Option<String>> {
    Ok(parse_optional_datetime(value.as_deref())?.map(to_storage))
}
