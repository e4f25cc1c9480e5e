//! Greedy local scheduler used when the external solver is unavailable.
//!
//! The schedule is a pure function of its inputs: the same tasks, preferences,
//! date and zone always yield the same block sequence.

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppResult;
use crate::models::block::{ProposedBlock, TaskBlock};
use crate::models::preferences::Preferences;
use crate::services::request_assembler::SolverTask;
use crate::services::schedule_utils::{add_minutes, at_local_time};

pub const FALLBACK_REASON: &str = "fallback scheduling";
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FallbackPlan {
    pub blocks: Vec<ProposedBlock>,
    pub unscheduled: Vec<String>,
}

/// Walks `tasks` in the given order from the day's work start. A task that
/// would end past work end is skipped without moving the cursor; once the
/// cursor reaches work end the walk stops.
pub fn schedule(
    tasks: &[SolverTask],
    prefs: &Preferences,
    date: NaiveDate,
    tz: Tz,
) -> AppResult<FallbackPlan> {
    let Some((work_start, work_end)) = prefs.work_window(date.weekday())? else {
        debug!(target: "app::planning", %date, "fallback: day off, nothing scheduled");
        return Ok(FallbackPlan {
            blocks: Vec::new(),
            unscheduled: tasks.iter().map(|task| task.id.clone()).collect(),
        });
    };

    let window_end = at_local_time(tz, date, work_end)?;
    let mut cursor = at_local_time(tz, date, work_start)?;
    let buffer = prefs.buffer_minutes();

    let mut blocks = Vec::new();
    let mut unscheduled = Vec::new();

    for task in tasks {
        if cursor >= window_end {
            unscheduled.push(task.id.clone());
            continue;
        }

        let end = add_minutes(cursor, task.duration_min.max(1))?;
        if end <= window_end {
            blocks.push(ProposedBlock::Task(TaskBlock {
                task_id: task.id.clone(),
                title: task.title.clone(),
                start_at: cursor,
                end_at: end,
                confidence: FALLBACK_CONFIDENCE,
                reason: Some(FALLBACK_REASON.to_string()),
            }));
            cursor = add_minutes(end, buffer)?;
        } else {
            unscheduled.push(task.id.clone());
        }
    }

    debug!(
        target: "app::planning",
        %date,
        scheduled = blocks.len(),
        unscheduled = unscheduled.len(),
        "fallback schedule built"
    );

    Ok(FallbackPlan {
        blocks,
        unscheduled,
    })
}
