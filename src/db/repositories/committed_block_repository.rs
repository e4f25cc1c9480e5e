use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use crate::error::AppResult;
use crate::models::block::{BlockType, CommittedBlock};
use crate::services::schedule_utils::{parse_datetime, to_storage};

const BASE_SELECT: &str = r#"
    SELECT
        id,
        user_id,
        plan_date,
        task_id,
        block_type,
        title,
        start_at,
        end_at,
        confidence,
        reason,
        idempotency_key,
        created_at
    FROM committed_blocks
"#;

#[derive(Debug, Clone)]
pub struct CommittedBlockRow {
    pub id: String,
    pub user_id: String,
    pub plan_date: String,
    pub task_id: Option<String>,
    pub block_type: String,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub confidence: f64,
    pub reason: Option<String>,
    pub idempotency_key: String,
    pub created_at: String,
}

impl CommittedBlockRow {
    pub fn from_record(record: &CommittedBlock) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            plan_date: record.plan_date.clone(),
            task_id: record.task_id.clone(),
            block_type: record.block_type.as_str().to_string(),
            title: record.title.clone(),
            start_at: to_storage(record.start_at),
            end_at: to_storage(record.end_at),
            confidence: record.confidence,
            reason: record.reason.clone(),
            idempotency_key: record.idempotency_key.clone(),
            created_at: record.created_at.clone(),
        }
    }

    pub fn into_record(self) -> AppResult<CommittedBlock> {
        Ok(CommittedBlock {
            block_type: BlockType::parse(&self.block_type)?,
            start_at: parse_datetime(&self.start_at)?,
            end_at: parse_datetime(&self.end_at)?,
            id: self.id,
            user_id: self.user_id,
            plan_date: self.plan_date,
            task_id: self.task_id,
            title: self.title,
            confidence: self.confidence,
            reason: self.reason,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<&Row<'_>> for CommittedBlockRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            plan_date: row.get("plan_date")?,
            task_id: row.get("task_id")?,
            block_type: row.get("block_type")?,
            title: row.get("title")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            confidence: row.get("confidence")?,
            reason: row.get("reason")?,
            idempotency_key: row.get("idempotency_key")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub struct CommittedBlockRepository;

impl CommittedBlockRepository {
    pub fn insert(conn: &Connection, row: &CommittedBlockRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO committed_blocks (
                    id,
                    user_id,
                    plan_date,
                    task_id,
                    block_type,
                    title,
                    start_at,
                    end_at,
                    confidence,
                    reason,
                    idempotency_key,
                    created_at
                ) VALUES (
                    :id,
                    :user_id,
                    :plan_date,
                    :task_id,
                    :block_type,
                    :title,
                    :start_at,
                    :end_at,
                    :confidence,
                    :reason,
                    :idempotency_key,
                    :created_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":plan_date": &row.plan_date,
                ":task_id": &row.task_id,
                ":block_type": &row.block_type,
                ":title": &row.title,
                ":start_at": &row.start_at,
                ":end_at": &row.end_at,
                ":confidence": row.confidence,
                ":reason": &row.reason,
                ":idempotency_key": &row.idempotency_key,
                ":created_at": &row.created_at,
            },
        )?;
        Ok(())
    }

    pub fn list_for_user_date(
        conn: &Connection,
        user_id: &str,
        plan_date: &str,
    ) -> AppResult<Vec<CommittedBlockRow>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE user_id = :user_id AND plan_date = :plan_date ORDER BY start_at ASC, id ASC",
            BASE_SELECT
        ))?;
        let rows = stmt
            .query_map(
                named_params! {":user_id": user_id, ":plan_date": plan_date},
                |row| CommittedBlockRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_for_user_date(
        conn: &Connection,
        user_id: &str,
        plan_date: &str,
    ) -> AppResult<usize> {
        let affected = conn.execute(
            "DELETE FROM committed_blocks WHERE user_id = :user_id AND plan_date = :plan_date",
            named_params! {":user_id": user_id, ":plan_date": plan_date},
        )?;
        Ok(affected)
    }
}
