use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::block::{CommittedBlock, ProposedBlock};
use crate::services::request_assembler::SolverFixedEvent;
use crate::services::schedule_utils::{overlaps, parse_datetime};

/// Shifts at or below this many seconds count as unchanged.
pub const MOVE_THRESHOLD_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub title: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
}

impl From<&ProposedBlock> for BlockSummary {
    fn from(block: &ProposedBlock) -> Self {
        Self {
            task_id: block.task_id().map(str::to_string),
            title: block.title().to_string(),
            start_at: block.start_at(),
            end_at: block.end_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovedBlock {
    pub task_id: String,
    pub title: String,
    pub previous_start: DateTime<FixedOffset>,
    pub new_start: DateTime<FixedOffset>,
    pub duration_min: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockConflict {
    pub first_task_id: String,
    pub second_task_id: String,
    pub first_end: DateTime<FixedOffset>,
    pub second_start: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanDiff {
    pub added: Vec<BlockSummary>,
    pub moved: Vec<MovedBlock>,
    pub conflicts: Vec<BlockConflict>,
    pub buffers: Vec<BlockSummary>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Critique {
    pub approve: bool,
    pub violations: Vec<String>,
}

/// Compares a proposal against the committed blocks of the same day.
/// Reporting only: nothing here blocks an apply.
pub fn compute_diff(proposed: &[ProposedBlock], committed: &[CommittedBlock]) -> PlanDiff {
    let existing: HashMap<&str, &CommittedBlock> = committed
        .iter()
        .filter(|block| !block.is_buffer())
        .filter_map(|block| block.task_id.as_deref().map(|id| (id, block)))
        .collect();

    let mut diff = PlanDiff::default();
    let mut task_blocks: Vec<&ProposedBlock> = Vec::new();

    for block in proposed {
        let Some(task_id) = block.task_id() else {
            diff.buffers.push(BlockSummary::from(block));
            continue;
        };
        task_blocks.push(block);

        match existing.get(task_id) {
            None => diff.added.push(BlockSummary::from(block)),
            Some(previous) => {
                let shift = (block.start_at() - previous.start_at).num_seconds().abs();
                if shift > MOVE_THRESHOLD_SECS {
                    diff.moved.push(MovedBlock {
                        task_id: task_id.to_string(),
                        title: block.title().to_string(),
                        previous_start: previous.start_at,
                        new_start: block.start_at(),
                        duration_min: block.duration_minutes(),
                    });
                }
            }
        }
    }

    // Consecutive pairs in the given order only.
    for pair in task_blocks.windows(2) {
        let (first, second) = (pair[0], pair[1]);
        if first.end_at() > second.start_at() {
            diff.conflicts.push(BlockConflict {
                first_task_id: first.task_id().unwrap_or_default().to_string(),
                second_task_id: second.task_id().unwrap_or_default().to_string(),
                first_end: first.end_at(),
                second_start: second.start_at(),
            });
        }
    }

    diff.summary = format!("{} block(s) to add", diff.added.len());
    diff
}

/// Flags every task block that overlaps a blocking fixed event as
/// `overlap:{task_id}:{event_id}`.
pub fn critique(proposed: &[ProposedBlock], fixed_events: &[SolverFixedEvent]) -> AppResult<Critique> {
    let mut windows = Vec::with_capacity(fixed_events.len());
    for event in fixed_events.iter().filter(|event| event.is_blocking) {
        windows.push((
            event.id.as_str(),
            parse_datetime(&event.start_dt)?,
            parse_datetime(&event.end_dt)?,
        ));
    }

    let mut violations = Vec::new();
    for block in proposed {
        let Some(task_id) = block.task_id() else {
            continue;
        };
        for (event_id, start, end) in &windows {
            if overlaps(block.start_at(), block.end_at(), *start, *end) {
                violations.push(format!("overlap:{task_id}:{event_id}"));
            }
        }
    }

    Ok(Critique {
        approve: violations.is_empty(),
        violations,
    })
}

/// Every overlapping pair in `blocks`, found by a sweep over start order.
/// Returns index pairs into the input slice.
pub fn find_overlaps(blocks: &[ProposedBlock]) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by_key(|&idx| (blocks[idx].start_at(), blocks[idx].end_at()));

    let mut found = Vec::new();
    let mut active: Vec<usize> = Vec::new();
    for idx in order {
        let start = blocks[idx].start_at();
        active.retain(|&open| blocks[open].end_at() > start);
        for &open in &active {
            found.push((open.min(idx), open.max(idx)));
        }
        active.push(idx);
    }
    found
}
