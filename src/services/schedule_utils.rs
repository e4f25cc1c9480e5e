use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    SecondsFormat, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde_json::json;

use crate::error::{AppError, AppResult};

pub fn parse_datetime(value: &str) -> AppResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|err| {
        AppError::validation_with_details(
            "无效的时间格式",
            json!({"value": value, "error": err.to_string()}),
        )
    })
}

pub fn parse_optional_datetime(value: Option<&str>) -> AppResult<Option<DateTime<FixedOffset>>> {
    match value {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(parse_datetime(raw)?)),
        _ => Ok(None),
    }
}

/// Canonical storage form: UTC, whole seconds, `Z` suffix. Text comparison
/// on this form matches chronological order.
pub fn to_storage(dt: DateTime<FixedOffset>) -> String {
    dt.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_storage() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_plan_date(value: &str) -> AppResult<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("缺少规划日期"));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|err| {
        AppError::validation_with_details(
            "无效的日期格式",
            json!({"value": value, "error": err.to_string()}),
        )
    })
}

pub fn parse_timezone(value: &str) -> AppResult<Tz> {
    value.trim().parse::<Tz>().map_err(|err| {
        AppError::validation_with_details(
            "未知的时区",
            json!({"value": value, "error": err.to_string()}),
        )
    })
}

/// Longest skipped interval a zone transition can produce (Pacific/Apia
/// dropped a whole day in 2011).
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Resolves a wall-clock time in `tz`. Ambiguous times take the earlier
/// offset; a time inside a DST gap resolves to the first instant after it.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> AppResult<DateTime<FixedOffset>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => return Ok(dt.fixed_offset()),
        LocalResult::Ambiguous(earlier, _) => return Ok(earlier.fixed_offset()),
        LocalResult::None => {}
    }

    let mut candidate = naive
        .with_second(0)
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(naive);
    for _ in 0..MAX_GAP_MINUTES {
        candidate += Duration::minutes(1);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Ok(dt.fixed_offset()),
            LocalResult::Ambiguous(earlier, _) => return Ok(earlier.fixed_offset()),
            LocalResult::None => {}
        }
    }

    Err(AppError::validation_with_details(
        "本地时间不存在",
        json!({"value": naive.to_string(), "timezone": tz.name()}),
    ))
}

pub fn at_local_time(tz: Tz, date: NaiveDate, time: NaiveTime) -> AppResult<DateTime<FixedOffset>> {
    localize(tz, date.and_time(time))
}

/// Local midnight of `date` up to the next local midnight.
pub fn local_day_bounds(
    tz: Tz,
    date: NaiveDate,
) -> AppResult<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    let next = date
        .succ_opt()
        .ok_or_else(|| AppError::validation("日期超出范围"))?;
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::other("无效的午夜时间"))?;
    let start = at_local_time(tz, date, midnight)?;
    let end = at_local_time(tz, next, midnight)?;
    Ok((start, end))
}

pub fn add_minutes(dt: DateTime<FixedOffset>, minutes: i64) -> AppResult<DateTime<FixedOffset>> {
    dt.checked_add_signed(Duration::minutes(minutes))
        .ok_or_else(|| AppError::validation("时间计算超出范围"))
}

pub fn duration_minutes(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
) -> AppResult<i64> {
    let total = end.signed_duration_since(start).num_minutes();
    if total < 0 {
        Err(AppError::validation("结束时间必须晚于开始时间"))
    } else {
        Ok(total)
    }
}

pub fn overlaps(
    a_start: DateTime<FixedOffset>,
    a_end: DateTime<FixedOffset>,
    b_start: DateTime<FixedOffset>,
    b_end: DateTime<FixedOffset>,
) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn ensure_window(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> AppResult<()> {
    if end <= start {
        Err(AppError::validation("时间窗口结束时间必须晚于开始"))
    } else {
        Ok(())
    }
}
