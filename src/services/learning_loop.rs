use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::db::repositories::preferences_repository::{PreferencesRepository, PreferencesRow};
use crate::db::repositories::task_repository::TaskRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::preferences::{DEFAULT_DEEP_WORK_MORNING, WEIGHT_DEEP_WORK_MORNING};
use crate::models::task::Energy;
use crate::models::telemetry::{TelemetryEvent, TelemetryKind};
use crate::services::schedule_utils::{now_storage, parse_datetime, parse_timezone};

/// Weight kept from the previous value.
pub const EWMA_RETAIN: f64 = 0.8;
/// Weight given to a positive morning observation.
pub const EWMA_OBSERVATION: f64 = 0.2;
/// Strength of one "moved into the morning" signal.
pub const MORNING_SIGNAL: f64 = 0.8;
pub const MORNING_CUTOFF_HOUR: u32 = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LearningOutcome {
    Updated {
        weight: String,
        previous: f64,
        current: f64,
        rationale: String,
    },
    Skipped {
        reason: String,
    },
}

impl LearningOutcome {
    fn skipped(reason: &str) -> Self {
        LearningOutcome::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, LearningOutcome::Updated { .. })
    }
}

/// `min(1, old * 0.8 + 0.8 * 0.2)`. The coefficients sum to 0.96, so
/// repeated application without reinforcement decays slowly.
pub fn ewma_update(old: f64) -> f64 {
    (old * EWMA_RETAIN + MORNING_SIGNAL * EWMA_OBSERVATION).min(1.0)
}

#[derive(Clone)]
pub struct LearningLoop {
    db: DbPool,
}

impl LearningLoop {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Adjusts `deep_work_morning` when a deep-work block was moved into the
    /// morning. Every other event leaves preferences untouched.
    pub fn observe(&self, event: &TelemetryEvent) -> AppResult<LearningOutcome> {
        if event.kind != TelemetryKind::BlockMoved {
            return Ok(LearningOutcome::skipped("event kind does not carry a learning signal"));
        }

        let Some(hour) = moved_to_local_hour(&event.payload)? else {
            return Ok(LearningOutcome::skipped("payload has no new start time"));
        };
        if hour >= MORNING_CUTOFF_HOUR {
            return Ok(LearningOutcome::skipped("block moved outside the morning"));
        }
        if !self.is_deep_work(&event.payload)? {
            return Ok(LearningOutcome::skipped("moved block is not deep work"));
        }

        let user_id = event.user_id.clone();
        let outcome = self.db.with_immediate_transaction(|tx| {
            let Some(row) = PreferencesRepository::get(tx, &user_id)? else {
                return Ok(LearningOutcome::skipped("no stored preference record"));
            };
            let mut record = row.into_record()?;
            let weights = record.data.weights.get_or_insert_with(Default::default);
            let previous = weights
                .get(WEIGHT_DEEP_WORK_MORNING)
                .copied()
                .unwrap_or(DEFAULT_DEEP_WORK_MORNING);
            let current = ewma_update(previous);
            weights.insert(WEIGHT_DEEP_WORK_MORNING.to_string(), current);
            record.updated_at = now_storage();

            PreferencesRepository::upsert(tx, &PreferencesRow::from_record(&record)?)?;
            Ok(LearningOutcome::Updated {
                weight: WEIGHT_DEEP_WORK_MORNING.to_string(),
                previous,
                current,
                rationale: "EWMA update".to_string(),
            })
        })?;

        match &outcome {
            LearningOutcome::Updated { previous, current, .. } => info!(
                target: "app::learning",
                user_id = %event.user_id,
                previous,
                current,
                "deep_work_morning updated"
            ),
            LearningOutcome::Skipped { reason } => debug!(
                target: "app::learning",
                user_id = %event.user_id,
                reason = %reason,
                "learning skipped"
            ),
        }
        Ok(outcome)
    }

    fn is_deep_work(&self, payload: &JsonValue) -> AppResult<bool> {
        if let Some(energy) = payload.get("energy").and_then(JsonValue::as_str) {
            return Ok(Energy::parse(Some(energy)) == Energy::Deep);
        }
        let Some(task_id) = payload_string(payload, "task_id") else {
            return Ok(false);
        };
        let task = self
            .db
            .with_connection(|conn| TaskRepository::find_by_id(conn, &task_id))?;
        Ok(task.map(|row| row.into_record().energy == Energy::Deep).unwrap_or(false))
    }
}

/// Local hour of `new_start` / `new_start_dt`, shifted into `timezone` when
/// one is given, otherwise read in the timestamp's own offset.
fn moved_to_local_hour(payload: &JsonValue) -> AppResult<Option<u32>> {
    use chrono::Timelike;

    let Some(raw) = payload_string(payload, "new_start").or_else(|| payload_string(payload, "new_start_dt"))
    else {
        return Ok(None);
    };
    let start = parse_datetime(&raw)?;
    let hour = match payload_string(payload, "timezone") {
        Some(zone) => start.with_timezone(&parse_timezone(&zone)?).hour(),
        None => start.hour(),
    };
    Ok(Some(hour))
}

fn payload_string(payload: &JsonValue, field: &str) -> Option<String> {
    match payload.get(field)? {
        JsonValue::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        JsonValue::Number(value) => Some(value.to_string()),
        _ => None,
    }
}
