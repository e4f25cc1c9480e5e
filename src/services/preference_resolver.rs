use serde_json::json;
use tracing::{debug, info};

use crate::db::repositories::preferences_repository::{PreferencesRepository, PreferencesRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::preferences::{
    parse_time_range, Preferences, PreferencesRecord, StoredPreferences,
};
use crate::services::schedule_utils::now_storage;

#[derive(Clone)]
pub struct PreferenceResolver {
    db: DbPool,
}

impl PreferenceResolver {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Effective preferences for `user_id`. Never fails for a missing record.
    pub fn resolve(&self, user_id: &str) -> AppResult<Preferences> {
        let stored = self.stored(user_id)?;
        let prefs = merge(stored.map(|record| record.data).unwrap_or_default());
        debug!(target: "app::planning", user_id = %user_id, "preferences resolved");
        Ok(prefs)
    }

    pub fn stored(&self, user_id: &str) -> AppResult<Option<PreferencesRecord>> {
        let row = self
            .db
            .with_connection(|conn| PreferencesRepository::get(conn, user_id))?;
        row.map(PreferencesRow::into_record).transpose()
    }

    /// Applies an explicit edit. Present fields overwrite, weights merge key
    /// by key, absent fields keep their stored value.
    pub fn update(&self, user_id: &str, patch: StoredPreferences) -> AppResult<Preferences> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("缺少用户标识"));
        }
        validate_patch(&patch)?;

        let current = self
            .stored(user_id)?
            .map(|record| record.data)
            .unwrap_or_default();
        let data = apply_patch(current, patch);

        let record = PreferencesRecord {
            user_id: user_id.to_string(),
            data,
            updated_at: now_storage(),
        };
        let row = PreferencesRow::from_record(&record)?;
        self.db
            .with_connection(|conn| PreferencesRepository::upsert(conn, &row))?;
        info!(target: "app::planning", user_id = %user_id, "preferences updated");
        Ok(merge(record.data))
    }
}

/// Overlays a stored record on the system defaults.
pub fn merge(stored: StoredPreferences) -> Preferences {
    let defaults = Preferences::default();

    let mut weights = defaults.weights;
    if let Some(overrides) = stored.weights {
        weights.extend(overrides);
    }
    for value in weights.values_mut() {
        *value = value.clamp(0.0, 1.0);
    }

    Preferences {
        work_hours_by_day: stored
            .work_hours_by_day
            .unwrap_or(defaults.work_hours_by_day),
        buffer_min: stored.buffer_min.unwrap_or(defaults.buffer_min),
        meeting_gap_min: stored.meeting_gap_min.unwrap_or(defaults.meeting_gap_min),
        sleep_window: stored.sleep_window.unwrap_or(defaults.sleep_window),
        travel_speed_kmh: stored.travel_speed_kmh.unwrap_or(defaults.travel_speed_kmh),
        energy_profile_by_hour: stored
            .energy_profile_by_hour
            .unwrap_or(defaults.energy_profile_by_hour),
        avoid_times: stored.avoid_times.unwrap_or(defaults.avoid_times),
        objective: stored.objective.unwrap_or(defaults.objective),
        weights,
    }
}

fn apply_patch(mut current: StoredPreferences, patch: StoredPreferences) -> StoredPreferences {
    if patch.work_hours_by_day.is_some() {
        current.work_hours_by_day = patch.work_hours_by_day;
    }
    if patch.buffer_min.is_some() {
        current.buffer_min = patch.buffer_min;
    }
    if patch.meeting_gap_min.is_some() {
        current.meeting_gap_min = patch.meeting_gap_min;
    }
    if patch.sleep_window.is_some() {
        current.sleep_window = patch.sleep_window;
    }
    if patch.travel_speed_kmh.is_some() {
        current.travel_speed_kmh = patch.travel_speed_kmh;
    }
    if patch.energy_profile_by_hour.is_some() {
        current.energy_profile_by_hour = patch.energy_profile_by_hour;
    }
    if patch.avoid_times.is_some() {
        current.avoid_times = patch.avoid_times;
    }
    if patch.objective.is_some() {
        current.objective = patch.objective;
    }
    if let Some(weights) = patch.weights {
        current.weights.get_or_insert_with(Default::default).extend(weights);
    }
    current
}

fn validate_patch(patch: &StoredPreferences) -> AppResult<()> {
    if let Some(days) = &patch.work_hours_by_day {
        for (day, range) in days {
            if range.trim().is_empty() {
                continue;
            }
            let (start, end) = parse_time_range(range)?;
            if end <= start {
                return Err(AppError::validation_with_details(
                    "工作时间范围无效",
                    json!({"day": day, "value": range}),
                ));
            }
        }
    }
    if let Some(ranges) = &patch.avoid_times {
        for range in ranges {
            parse_time_range(range)?;
        }
    }
    if let Some(sleep) = &patch.sleep_window {
        parse_time_range(sleep)?;
    }
    for (field, value) in [
        ("buffer_min", patch.buffer_min),
        ("meeting_gap_min", patch.meeting_gap_min),
        ("travel_speed_kmh", patch.travel_speed_kmh),
    ] {
        if matches!(value, Some(v) if v < 0) {
            return Err(AppError::validation_with_details(
                "偏好数值不能为负",
                json!({"field": field}),
            ));
        }
    }
    if let Some(weights) = &patch.weights {
        if let Some((key, value)) = weights.iter().find(|(_, v)| !(0.0..=1.0).contains(*v)) {
            return Err(AppError::validation_with_details(
                "偏好权重必须位于 0 到 1 之间",
                json!({"weight": key, "value": value}),
            ));
        }
    }
    Ok(())
}
