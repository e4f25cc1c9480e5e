use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::AppResult;
use crate::models::preferences::{PreferencesRecord, StoredPreferences};

#[derive(Debug, Clone)]
pub struct PreferencesRow {
    pub user_id: String,
    pub data: String,
    pub updated_at: String,
}

impl PreferencesRow {
    pub fn from_record(record: &PreferencesRecord) -> AppResult<Self> {
        Ok(Self {
            user_id: record.user_id.clone(),
            data: serde_json::to_string(&record.data)?,
            updated_at: record.updated_at.clone(),
        })
    }

    pub fn into_record(self) -> AppResult<PreferencesRecord> {
        let data = if self.data.trim().is_empty() {
            StoredPreferences::default()
        } else {
            serde_json::from_str(&self.data)?
        };
        Ok(PreferencesRecord {
            user_id: self.user_id,
            data,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<&Row<'_>> for PreferencesRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            data: row.get("data")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct PreferencesRepository;

impl PreferencesRepository {
    pub fn get(conn: &Connection, user_id: &str) -> AppResult<Option<PreferencesRow>> {
        let mut stmt = conn
            .prepare("SELECT user_id, data, updated_at FROM user_preferences WHERE user_id = ?1")?;
        let row = stmt
            .query_row([user_id], |row| PreferencesRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn upsert(conn: &Connection, row: &PreferencesRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO user_preferences (user_id, data, updated_at)
                VALUES (:user_id, :data, :updated_at)
                ON CONFLICT(user_id) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":user_id": &row.user_id,
                ":data": &row.data,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }
}
