use std::collections::BTreeMap;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const WEIGHT_DEEP_WORK_MORNING: &str = "deep_work_morning";

pub const DEFAULT_WORK_HOURS: &str = "09:00-18:00";
pub const DEFAULT_BUFFER_MIN: i64 = 15;
pub const DEFAULT_MEETING_GAP_MIN: i64 = 10;
pub const DEFAULT_SLEEP_WINDOW: &str = "22:00-07:00";
pub const DEFAULT_TRAVEL_SPEED_KMH: i64 = 5;
pub const DEFAULT_OBJECTIVE: &str = "balanced";
pub const DEFAULT_DEEP_WORK_MORNING: f64 = 0.6;

/// Fully populated scheduling preferences, as sent to the solver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    pub work_hours_by_day: BTreeMap<String, String>,
    pub buffer_min: i64,
    pub meeting_gap_min: i64,
    pub sleep_window: String,
    pub travel_speed_kmh: i64,
    pub energy_profile_by_hour: BTreeMap<String, f64>,
    pub avoid_times: Vec<String>,
    pub objective: String,
    pub weights: BTreeMap<String, f64>,
}

impl Default for Preferences {
    fn default() -> Self {
        let work_hours_by_day = ["monday", "tuesday", "wednesday", "thursday", "friday"]
            .into_iter()
            .map(|day| (day.to_string(), DEFAULT_WORK_HOURS.to_string()))
            .collect();

        let energy_profile_by_hour = [
            ("08:00", 0.7),
            ("09:00", 0.9),
            ("10:00", 0.9),
            ("11:00", 0.8),
            ("12:00", 0.5),
            ("13:00", 0.4),
            ("14:00", 0.6),
            ("15:00", 0.6),
            ("16:00", 0.5),
            ("17:00", 0.4),
        ]
        .into_iter()
        .map(|(hour, factor)| (hour.to_string(), factor))
        .collect();

        let weights = [(WEIGHT_DEEP_WORK_MORNING.to_string(), DEFAULT_DEEP_WORK_MORNING)]
            .into_iter()
            .collect();

        Self {
            work_hours_by_day,
            buffer_min: DEFAULT_BUFFER_MIN,
            meeting_gap_min: DEFAULT_MEETING_GAP_MIN,
            sleep_window: DEFAULT_SLEEP_WINDOW.to_string(),
            travel_speed_kmh: DEFAULT_TRAVEL_SPEED_KMH,
            energy_profile_by_hour,
            avoid_times: Vec::new(),
            objective: DEFAULT_OBJECTIVE.to_string(),
            weights,
        }
    }
}

impl Preferences {
    /// Work window for a weekday. `None` means the day is configured off
    /// (empty string); weekdays without an entry use the default hours.
    pub fn work_window(&self, weekday: Weekday) -> AppResult<Option<(NaiveTime, NaiveTime)>> {
        let raw = self
            .work_hours_by_day
            .get(weekday_key(weekday))
            .map(String::as_str)
            .unwrap_or(DEFAULT_WORK_HOURS);

        if raw.trim().is_empty() {
            return Ok(None);
        }

        let (start, end) = parse_time_range(raw)?;
        if end <= start {
            return Err(AppError::validation(format!("工作时间范围无效: {raw}")));
        }
        Ok(Some((start, end)))
    }

    pub fn deep_work_morning(&self) -> f64 {
        self.weights
            .get(WEIGHT_DEEP_WORK_MORNING)
            .copied()
            .unwrap_or(DEFAULT_DEEP_WORK_MORNING)
    }

    pub fn buffer_minutes(&self) -> i64 {
        self.buffer_min.max(0)
    }
}

/// Persisted per-user preferences. Every field may be absent; absent fields
/// resolve to the defaults on [`Preferences`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoredPreferences {
    pub work_hours_by_day: Option<BTreeMap<String, String>>,
    pub buffer_min: Option<i64>,
    pub meeting_gap_min: Option<i64>,
    pub sleep_window: Option<String>,
    pub travel_speed_kmh: Option<i64>,
    pub energy_profile_by_hour: Option<BTreeMap<String, f64>>,
    pub avoid_times: Option<Vec<String>>,
    pub objective: Option<String>,
    pub weights: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferencesRecord {
    pub user_id: String,
    pub data: StoredPreferences,
    pub updated_at: String,
}

pub fn weekday_key(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Parses `"HH:MM-HH:MM"`.
pub fn parse_time_range(raw: &str) -> AppResult<(NaiveTime, NaiveTime)> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| AppError::validation(format!("时间范围格式无效: {raw}")))?;
    Ok((parse_clock(start)?, parse_clock(end)?))
}

fn parse_clock(raw: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|err| AppError::validation(format!("时间格式无效: {raw} ({err})")))
}
