use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::idempotency::{IdempotencyRecord, IdempotencyState};

#[derive(Debug, Clone)]
pub struct IdempotencyRow {
    pub key: String,
    pub user_id: String,
    pub state: String,
    pub outcome_hash: Option<String>,
    pub outcome_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl IdempotencyRow {
    pub fn into_record(self) -> AppResult<IdempotencyRecord> {
        let outcome = match self.outcome_json {
            Some(raw) if !raw.is_empty() => Some(serde_json::from_str(&raw)?),
            _ => None,
        };
        Ok(IdempotencyRecord {
            state: IdempotencyState::parse(&self.state)?,
            key: self.key,
            user_id: self.user_id,
            outcome_hash: self.outcome_hash,
            outcome,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<&Row<'_>> for IdempotencyRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            key: row.get("key")?,
            user_id: row.get("user_id")?,
            state: row.get("state")?,
            outcome_hash: row.get("outcome_hash")?,
            outcome_json: row.get("outcome_json")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct IdempotencyRepository;

impl IdempotencyRepository {
    pub fn find(conn: &Connection, key: &str) -> AppResult<Option<IdempotencyRow>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT key, user_id, state, outcome_hash, outcome_json, created_at, updated_at
                FROM idempotency_records
                WHERE key = ?1
            "#,
        )?;
        let row = stmt
            .query_row([key], |row| IdempotencyRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    /// Claims `key` in the `applying` state. A second claim on the same key
    /// violates the primary key and surfaces as a conflict.
    pub fn insert_applying(conn: &Connection, key: &str, user_id: &str, now: &str) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO idempotency_records (key, user_id, state, created_at, updated_at)
                VALUES (:key, :user_id, :state, :now, :now)
            "#,
            named_params! {
                ":key": key,
                ":user_id": user_id,
                ":state": IdempotencyState::Applying.as_str(),
                ":now": now,
            },
        )?;
        Ok(())
    }

    pub fn mark_recorded(
        conn: &Connection,
        key: &str,
        outcome_hash: &str,
        outcome_json: &str,
        now: &str,
    ) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE idempotency_records SET
                    state = :state,
                    outcome_hash = :outcome_hash,
                    outcome_json = :outcome_json,
                    updated_at = :now
                WHERE key = :key AND state = :applying
            "#,
            named_params! {
                ":key": key,
                ":state": IdempotencyState::Recorded.as_str(),
                ":applying": IdempotencyState::Applying.as_str(),
                ":outcome_hash": outcome_hash,
                ":outcome_json": outcome_json,
                ":now": now,
            },
        )?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }
}
