use std::cmp::Ordering;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::repositories::fixed_event_repository::{FixedEventRepository, FixedEventRow};
use crate::db::repositories::task_repository::{TaskRepository, TaskRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::fixed_event::FixedEventRecord;
use crate::models::preferences::Preferences;
use crate::models::task::{Energy, PriorityScale, TaskRecord};
use crate::services::schedule_utils::{
    local_day_bounds, parse_plan_date, parse_timezone, to_storage,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverTask {
    pub id: String,
    pub title: String,
    pub duration_min: i64,
    pub priority: f64,
    pub energy: Energy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_dt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_start_dt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_end_dt: Option<String>,
    #[serde(default)]
    pub hard_fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverFixedEvent {
    pub id: String,
    pub title: String,
    pub start_dt: String,
    pub end_dt: String,
    pub is_blocking: bool,
    pub is_commute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverRequest {
    pub tasks: Vec<SolverTask>,
    pub fixed_events: Vec<SolverFixedEvent>,
    #[serde(rename = "prefs", alias = "preferences")]
    pub prefs: Preferences,
    pub date: String,
    pub timezone: String,
}

/// A solver request plus the parsed coordinates the fallback path needs.
#[derive(Debug, Clone)]
pub struct AssembledRequest {
    pub request: SolverRequest,
    pub date: NaiveDate,
    pub timezone: Tz,
}

#[derive(Clone)]
pub struct RequestAssembler {
    db: DbPool,
    scale: PriorityScale,
}

impl RequestAssembler {
    pub fn new(db: DbPool, scale: PriorityScale) -> Self {
        Self { db, scale }
    }

    pub fn assemble(
        &self,
        user_id: &str,
        date: &str,
        timezone: &str,
        prefs: Preferences,
    ) -> AppResult<AssembledRequest> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("缺少用户标识"));
        }
        let plan_date = parse_plan_date(date)?;
        let tz = parse_timezone(timezone)?;
        let (day_start, day_end) = local_day_bounds(tz, plan_date)?;
        let window_start = to_storage(day_start);
        let window_end = to_storage(day_end);

        let (task_rows, event_rows) = self.db.with_connection(|conn| {
            let tasks = TaskRepository::list_pending_for_user(conn, user_id)?;
            let events =
                FixedEventRepository::list_blocking_within(conn, user_id, &window_start, &window_end)?;
            Ok((tasks, events))
        })?;

        let mut tasks: Vec<TaskRecord> = task_rows.into_iter().map(TaskRow::into_record).collect();
        order_backlog(&mut tasks, &self.scale);

        let solver_tasks: Vec<SolverTask> = tasks
            .iter()
            .map(|task| normalize_task(task, &self.scale))
            .collect();
        let fixed_events: Vec<SolverFixedEvent> = event_rows
            .into_iter()
            .map(FixedEventRow::into_record)
            .map(normalize_event)
            .collect();

        debug!(
            target: "app::planning",
            user_id = %user_id,
            date = %plan_date,
            tasks = solver_tasks.len(),
            fixed_events = fixed_events.len(),
            "solver request assembled"
        );

        Ok(AssembledRequest {
            request: SolverRequest {
                tasks: solver_tasks,
                fixed_events,
                prefs,
                date: plan_date.format("%Y-%m-%d").to_string(),
                timezone: tz.name().to_string(),
            },
            date: plan_date,
            timezone: tz,
        })
    }
}

/// Descending mapped priority, then ascending creation time.
pub fn order_backlog(tasks: &mut [TaskRecord], scale: &PriorityScale) {
    tasks.sort_by(|a, b| {
        scale
            .weight(&b.priority)
            .partial_cmp(&scale.weight(&a.priority))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn normalize_task(task: &TaskRecord, scale: &PriorityScale) -> SolverTask {
    SolverTask {
        id: task.id.clone(),
        title: task.title.clone(),
        duration_min: task.effective_duration(),
        priority: scale.weight(&task.priority),
        energy: task.energy,
        deadline_dt: task.deadline_at.clone(),
        earliest_start_dt: task.earliest_start_at.clone(),
        latest_end_dt: task.latest_end_at.clone(),
        hard_fixed: task.hard_fixed,
        location: task.location.clone(),
    }
}

pub fn normalize_event(event: FixedEventRecord) -> SolverFixedEvent {
    SolverFixedEvent {
        id: event.id,
        title: event.title,
        start_dt: event.start_at,
        end_dt: event.end_at,
        is_blocking: event.is_blocking,
        is_commute: event.is_commute,
        location: event.location,
    }
}
