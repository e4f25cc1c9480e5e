use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use crate::error::AppResult;
use crate::models::fixed_event::FixedEventRecord;

#[derive(Debug, Clone)]
pub struct FixedEventRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub is_blocking: bool,
    pub is_commute: bool,
    pub location: Option<String>,
}

impl FixedEventRow {
    pub fn from_record(record: &FixedEventRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            title: record.title.clone(),
            start_at: record.start_at.clone(),
            end_at: record.end_at.clone(),
            is_blocking: record.is_blocking,
            is_commute: record.is_commute,
            location: record.location.clone(),
        }
    }

    pub fn into_record(self) -> FixedEventRecord {
        FixedEventRecord {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            start_at: self.start_at,
            end_at: self.end_at,
            is_blocking: self.is_blocking,
            is_commute: self.is_commute,
            location: self.location,
        }
    }
}

impl TryFrom<&Row<'_>> for FixedEventRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            is_blocking: row.get::<_, i64>("is_blocking")? != 0,
            is_commute: row.get::<_, i64>("is_commute")? != 0,
            location: row.get("location")?,
        })
    }
}

pub struct FixedEventRepository;

impl FixedEventRepository {
    pub fn insert(conn: &Connection, row: &FixedEventRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO fixed_events (
                    id, user_id, title, start_at, end_at, is_blocking, is_commute, location
                ) VALUES (
                    :id, :user_id, :title, :start_at, :end_at, :is_blocking, :is_commute, :location
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":title": &row.title,
                ":start_at": &row.start_at,
                ":end_at": &row.end_at,
                ":is_blocking": row.is_blocking as i64,
                ":is_commute": row.is_commute as i64,
                ":location": &row.location,
            },
        )?;
        Ok(())
    }

    /// Blocking events lying entirely inside `[window_start, window_end]`.
    /// Bounds are canonical UTC storage strings.
    pub fn list_blocking_within(
        conn: &Connection,
        user_id: &str,
        window_start: &str,
        window_end: &str,
    ) -> AppResult<Vec<FixedEventRow>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT id, user_id, title, start_at, end_at, is_blocking, is_commute, location
                FROM fixed_events
                WHERE user_id = :user_id
                  AND is_blocking = 1
                  AND start_at >= :window_start
                  AND end_at <= :window_end
                ORDER BY start_at ASC, id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":user_id": user_id,
                    ":window_start": window_start,
                    ":window_end": window_end,
                },
                |row| FixedEventRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
