use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::db::repositories::telemetry_repository::{TelemetryRepository, TelemetryRow};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::block::ProposedBlock;
use crate::models::preferences::{Preferences, StoredPreferences};
use crate::models::telemetry::{TelemetryEvent, TelemetryKind};
use crate::services::apply_pipeline::{list_committed, ApplyPipeline, ApplyRequest, ApplyResponse};
use crate::services::calendar_sync::{CalendarSync, WebhookCalendarSync};
use crate::services::diff_engine::{compute_diff, critique, PlanDiff};
use crate::services::fallback_scheduler::{self, FallbackPlan};
use crate::services::learning_loop::{LearningLoop, LearningOutcome};
use crate::services::plan_session::{PlanSession, PlanSessionCache, PlanSource};
use crate::services::preference_resolver::PreferenceResolver;
use crate::services::request_assembler::RequestAssembler;
use crate::services::run_blocking;
use crate::services::schedule_utils::{now_storage, parse_datetime, to_storage};
use crate::services::solver_gateway::{HttpSolverClient, SolverClient, SolverHealth};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRequest {
    pub user_id: String,
    pub date: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanStats {
    pub task_count: usize,
    pub fixed_event_count: usize,
    pub scheduled_count: usize,
    pub unscheduled_count: usize,
    pub total_scheduled_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanFailure {
    pub code: String,
    pub message: String,
}

/// Result of a plan call. `proposed_events` always holds the blocks stored in
/// the plan session; on solver failure they are the fallback blocks and
/// `fallback_plan` repeats them together with the unscheduled tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanResponse {
    pub success: bool,
    pub source: PlanSource,
    pub date: String,
    pub timezone: String,
    pub proposed_events: Vec<ProposedBlock>,
    pub diff: PlanDiff,
    pub violations: Vec<String>,
    pub unscheduled: Vec<String>,
    pub stats: PlanStats,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PlanFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_plan: Option<FallbackPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryInput {
    pub user_id: String,
    #[serde(alias = "event_type")]
    pub kind: String,
    #[serde(default, alias = "data")]
    pub payload: JsonValue,
    #[serde(default)]
    pub occurred_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryAck {
    pub event_id: String,
    pub kind: TelemetryKind,
    pub weights_changed: bool,
    pub learning: LearningOutcome,
}

pub struct PlanningService {
    db: DbPool,
    config: PlannerConfig,
    resolver: PreferenceResolver,
    assembler: RequestAssembler,
    solver: Arc<dyn SolverClient>,
    sessions: Arc<PlanSessionCache>,
    pipeline: ApplyPipeline,
    learning: LearningLoop,
}

impl PlanningService {
    pub fn new(
        db: DbPool,
        config: PlannerConfig,
        solver: Arc<dyn SolverClient>,
        calendar: Option<Arc<dyn CalendarSync>>,
    ) -> Self {
        let sessions = Arc::new(PlanSessionCache::new(
            config.session_capacity,
            config.session_ttl,
        ));
        let calendar = if config.calendar_sync_enabled {
            calendar
        } else {
            None
        };
        Self {
            resolver: PreferenceResolver::new(db.clone()),
            assembler: RequestAssembler::new(db.clone(), config.priority_scale),
            pipeline: ApplyPipeline::new(db.clone(), sessions.clone(), calendar),
            learning: LearningLoop::new(db.clone()),
            solver,
            sessions,
            config,
            db,
        }
    }

    /// Wires the HTTP solver and, when enabled, the webhook calendar sync.
    pub fn from_config(db: DbPool, config: PlannerConfig) -> AppResult<Self> {
        let solver: Arc<dyn SolverClient> = Arc::new(HttpSolverClient::try_new(
            &config.solver_base_url,
            config.solver_timeout,
        )?);
        let calendar: Option<Arc<dyn CalendarSync>> =
            match (config.calendar_sync_enabled, config.calendar_sync_url.as_deref()) {
                (true, Some(url)) => Some(Arc::new(WebhookCalendarSync::try_new(
                    url,
                    config.solver_timeout,
                )?)),
                _ => None,
            };
        Ok(Self::new(db, config, solver, calendar))
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<PlanSessionCache> {
        &self.sessions
    }

    pub fn pipeline(&self) -> &ApplyPipeline {
        &self.pipeline
    }

    pub fn resolver(&self) -> &PreferenceResolver {
        &self.resolver
    }

    pub async fn plan(&self, request: PlanRequest) -> AppResult<PlanResponse> {
        self.plan_at(request, Utc::now()).await
    }

    /// Builds a proposal and stores it as the user's plan session. Solver
    /// failures downgrade to the fallback scheduler and are never returned
    /// as errors.
    pub async fn plan_at(&self, request: PlanRequest, now: DateTime<Utc>) -> AppResult<PlanResponse> {
        let user_id = request.user_id.trim().to_string();
        let (resolver, assembler, db) = (self.resolver.clone(), self.assembler.clone(), self.db.clone());
        let owner = user_id.clone();
        let (prefs, assembled, committed) = run_blocking(move || {
            let prefs = resolver.resolve(&owner)?;
            let assembled = assembler.assemble(&owner, &request.date, &request.timezone, prefs.clone())?;
            let committed = list_committed(&db, &owner, &assembled.request.date)?;
            Ok((prefs, assembled, committed))
        })
        .await?;
        let date = assembled.request.date.clone();
        let timezone = assembled.request.timezone.clone();

        let (source, blocks, unscheduled, solver_stats, messages, failure, fallback_plan) =
            match self.solver.solve(&assembled.request).await {
                Ok(response) => (
                    PlanSource::Solver,
                    response.proposed_events,
                    response.unscheduled_tasks,
                    response.stats,
                    response.messages,
                    None,
                    None,
                ),
                Err(err) => {
                    let code = err
                        .solver_code()
                        .map(|code| code.as_str().to_string())
                        .unwrap_or_else(|| "UNKNOWN".to_string());
                    warn!(
                        target: "app::planning",
                        user_id = %user_id,
                        code = %code,
                        error = %err,
                        "solver unavailable, using fallback scheduler"
                    );

                    let top_n = self.config.fallback_top_n;
                    let mut plan = fallback_scheduler::schedule(
                        &assembled.request.tasks[..assembled.request.tasks.len().min(top_n)],
                        &prefs,
                        assembled.date,
                        assembled.timezone,
                    )?;
                    plan.unscheduled.extend(
                        assembled
                            .request
                            .tasks
                            .iter()
                            .skip(top_n)
                            .map(|task| task.id.clone()),
                    );

                    (
                        PlanSource::Fallback,
                        plan.blocks.clone(),
                        plan.unscheduled.clone(),
                        None,
                        Vec::new(),
                        Some(PlanFailure {
                            code,
                            message: err.to_string(),
                        }),
                        Some(plan),
                    )
                }
            };

        let diff = compute_diff(&blocks, &committed);
        let critique = critique(&blocks, &assembled.request.fixed_events)?;
        let stats = PlanStats {
            task_count: assembled.request.tasks.len(),
            fixed_event_count: assembled.request.fixed_events.len(),
            scheduled_count: blocks.iter().filter(|block| block.task_id().is_some()).count(),
            unscheduled_count: unscheduled.len(),
            total_scheduled_minutes: blocks
                .iter()
                .filter(|block| block.task_id().is_some())
                .map(ProposedBlock::duration_minutes)
                .sum(),
            solver: solver_stats,
        };

        self.sessions.put(PlanSession {
            user_id: user_id.clone(),
            date: date.clone(),
            timezone: timezone.clone(),
            blocks: blocks.clone(),
            source,
            created_at: now,
        })?;

        info!(
            target: "app::planning",
            user_id = %user_id,
            date = %date,
            source = ?source,
            blocks = blocks.len(),
            added = diff.added.len(),
            moved = diff.moved.len(),
            violations = critique.violations.len(),
            "plan generated"
        );

        Ok(PlanResponse {
            success: failure.is_none(),
            source,
            date,
            timezone,
            proposed_events: blocks,
            diff,
            violations: critique.violations,
            unscheduled,
            stats,
            messages,
            error: failure,
            fallback_plan,
        })
    }

    pub async fn apply(&self, request: ApplyRequest) -> AppResult<ApplyResponse> {
        self.pipeline.apply(request, Utc::now()).await
    }

    pub async fn apply_at(&self, request: ApplyRequest, now: DateTime<Utc>) -> AppResult<ApplyResponse> {
        self.pipeline.apply(request, now).await
    }

    /// Persists the event, then runs the learning loop best-effort.
    pub fn ingest_telemetry(&self, input: TelemetryInput) -> AppResult<TelemetryAck> {
        let user_id = input.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(AppError::validation("缺少用户标识"));
        }
        if input.kind.trim().is_empty() {
            return Err(AppError::validation("缺少事件类型"));
        }
        let occurred_at = match input.occurred_at.as_deref() {
            Some(raw) if !raw.trim().is_empty() => to_storage(parse_datetime(raw)?),
            _ => now_storage(),
        };
        let payload = match input.payload {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other,
        };

        let event = TelemetryEvent {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind: TelemetryKind::parse(&input.kind),
            payload,
            occurred_at,
        };
        let row = TelemetryRow::from_record(&event)?;
        self.db
            .with_connection(|conn| TelemetryRepository::insert(conn, &row))?;

        let learning = self.learning.observe(&event).unwrap_or_else(|err| {
            warn!(
                target: "app::learning",
                user_id = %event.user_id,
                error = %err,
                "learning update failed, telemetry kept"
            );
            LearningOutcome::Skipped {
                reason: format!("learning failed: {err}"),
            }
        });

        Ok(TelemetryAck {
            event_id: event.id,
            kind: event.kind,
            weights_changed: learning.is_updated(),
            learning,
        })
    }

    pub fn telemetry_events(&self, user_id: &str) -> AppResult<Vec<TelemetryEvent>> {
        let rows = self
            .db
            .with_connection(|conn| TelemetryRepository::list_for_user(conn, user_id))?;
        rows.into_iter().map(TelemetryRow::into_record).collect()
    }

    pub fn preferences(&self, user_id: &str) -> AppResult<Preferences> {
        self.resolver.resolve(user_id)
    }

    pub fn update_preferences(&self, user_id: &str, patch: StoredPreferences) -> AppResult<Preferences> {
        self.resolver.update(user_id, patch)
    }

    pub async fn solver_health(&self) -> AppResult<SolverHealth> {
        self.solver.health().await
    }
}
