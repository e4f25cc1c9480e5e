use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::task::{Energy, TaskRecord, STATUS_DONE};

const BASE_SELECT: &str = r#"
    SELECT
        id,
        user_id,
        title,
        status,
        priority,
        energy,
        duration_min,
        deadline_at,
        earliest_start_at,
        latest_end_at,
        hard_fixed,
        location,
        created_at,
        updated_at
    FROM tasks
"#;

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub energy: String,
    pub duration_min: Option<i64>,
    pub deadline_at: Option<String>,
    pub earliest_start_at: Option<String>,
    pub latest_end_at: Option<String>,
    pub hard_fixed: bool,
    pub location: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            title: record.title.clone(),
            status: record.status.clone(),
            priority: record.priority.clone(),
            energy: record.energy.as_str().to_string(),
            duration_min: record.duration_min,
            deadline_at: record.deadline_at.clone(),
            earliest_start_at: record.earliest_start_at.clone(),
            latest_end_at: record.latest_end_at.clone(),
            hard_fixed: record.hard_fixed,
            location: record.location.clone(),
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
        }
    }

    pub fn into_record(self) -> TaskRecord {
        TaskRecord {
            energy: Energy::parse(Some(&self.energy)),
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            status: self.status,
            priority: self.priority,
            duration_min: self.duration_min,
            deadline_at: self.deadline_at,
            earliest_start_at: self.earliest_start_at,
            latest_end_at: self.latest_end_at,
            hard_fixed: self.hard_fixed,
            location: self.location,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl TryFrom<&Row<'_>> for TaskRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(TaskRow {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            status: row.get("status")?,
            priority: row.get("priority")?,
            energy: row.get("energy")?,
            duration_min: row.get("duration_min")?,
            deadline_at: row.get("deadline_at")?,
            earliest_start_at: row.get("earliest_start_at")?,
            latest_end_at: row.get("latest_end_at")?,
            hard_fixed: row.get::<_, i64>("hard_fixed")? != 0,
            location: row.get("location")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct TaskRepository;

impl TaskRepository {
    pub fn insert(conn: &Connection, row: &TaskRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO tasks (
                    id,
                    user_id,
                    title,
                    status,
                    priority,
                    energy,
                    duration_min,
                    deadline_at,
                    earliest_start_at,
                    latest_end_at,
                    hard_fixed,
                    location,
                    created_at,
                    updated_at
                ) VALUES (
                    :id,
                    :user_id,
                    :title,
                    :status,
                    :priority,
                    :energy,
                    :duration_min,
                    :deadline_at,
                    :earliest_start_at,
                    :latest_end_at,
                    :hard_fixed,
                    :location,
                    :created_at,
                    :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":title": &row.title,
                ":status": &row.status,
                ":priority": &row.priority,
                ":energy": &row.energy,
                ":duration_min": &row.duration_min,
                ":deadline_at": &row.deadline_at,
                ":earliest_start_at": &row.earliest_start_at,
                ":latest_end_at": &row.latest_end_at,
                ":hard_fixed": row.hard_fixed as i64,
                ":location": &row.location,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    pub fn update_status(
        conn: &Connection,
        id: &str,
        status: &str,
        updated_at: &str,
    ) -> AppResult<()> {
        let affected = conn.execute(
            "UPDATE tasks SET status = :status, updated_at = :updated_at WHERE id = :id",
            named_params! {
                ":id": id,
                ":status": status,
                ":updated_at": updated_at,
            },
        )?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<TaskRow>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", BASE_SELECT))?;
        let row = stmt
            .query_row([id], |row| TaskRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    /// Every task of the user that is not in the terminal `done` state.
    pub fn list_pending_for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<TaskRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE user_id = :user_id AND lower(status) <> :done ORDER BY created_at ASC, id ASC",
            BASE_SELECT
        ))?;
        let rows = stmt
            .query_map(
                named_params! {":user_id": user_id, ":done": STATUS_DONE},
                |row| TaskRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
