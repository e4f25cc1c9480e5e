use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use crate::error::AppResult;
use crate::models::telemetry::{TelemetryEvent, TelemetryKind};

#[derive(Debug, Clone)]
pub struct TelemetryRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub payload: String,
    pub occurred_at: String,
}

impl TelemetryRow {
    pub fn from_record(record: &TelemetryEvent) -> AppResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            kind: record.kind.as_str().to_string(),
            payload: serde_json::to_string(&record.payload)?,
            occurred_at: record.occurred_at.clone(),
        })
    }

    pub fn into_record(self) -> AppResult<TelemetryEvent> {
        Ok(TelemetryEvent {
            kind: TelemetryKind::parse(&self.kind),
            payload: serde_json::from_str(&self.payload)?,
            id: self.id,
            user_id: self.user_id,
            occurred_at: self.occurred_at,
        })
    }
}

impl TryFrom<&Row<'_>> for TelemetryRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            kind: row.get("kind")?,
            payload: row.get("payload")?,
            occurred_at: row.get("occurred_at")?,
        })
    }
}

pub struct TelemetryRepository;

impl TelemetryRepository {
    pub fn insert(conn: &Connection, row: &TelemetryRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO telemetry_events (id, user_id, kind, payload, occurred_at)
                VALUES (:id, :user_id, :kind, :payload, :occurred_at)
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":kind": &row.kind,
                ":payload": &row.payload,
                ":occurred_at": &row.occurred_at,
            },
        )?;
        Ok(())
    }

    pub fn list_for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<TelemetryRow>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT id, user_id, kind, payload, occurred_at
                FROM telemetry_events
                WHERE user_id = ?1
                ORDER BY occurred_at ASC, id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([user_id], |row| TelemetryRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
