use serde::Deserialize;
use tracing::info;

use crate::models::preferences::{Preferences, StoredPreferences};
use crate::services::apply_pipeline::{ApplyRequest, ApplyResponse};
use crate::services::planning_service::{PlanRequest, PlanResponse};
use crate::services::solver_gateway::SolverHealth;

use super::{run_blocking, AppState, CommandError, CommandResult};

pub async fn plan_generate(state: &AppState, payload: PlanRequest) -> CommandResult<PlanResponse> {
    let service = state.planning();
    let response = service.plan(payload).await?;
    Ok(response)
}

/// `header_key` is the out-of-band idempotency key; it overrides the body.
pub async fn plan_apply(
    state: &AppState,
    header_key: Option<String>,
    mut payload: ApplyRequest,
) -> CommandResult<ApplyResponse> {
    if let Some(key) = header_key.filter(|key| !key.trim().is_empty()) {
        payload.idempotency_key = Some(key);
    }
    let service = state.planning();
    let response = service.apply(payload).await?;
    if response.replayed {
        info!(target: "app::command", key = %response.idempotency_key, "apply answered from record");
    }
    Ok(response)
}

pub async fn preferences_get(state: &AppState, user_id: String) -> CommandResult<Preferences> {
    let state = state.clone();
    run_blocking(move || state.planning().preferences(&user_id)).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesUpdatePayload {
    pub user_id: String,
    #[serde(flatten)]
    pub patch: StoredPreferences,
}

pub async fn preferences_update(
    state: &AppState,
    payload: PreferencesUpdatePayload,
) -> CommandResult<Preferences> {
    let state = state.clone();
    run_blocking(move || {
        state
            .planning()
            .update_preferences(&payload.user_id, payload.patch)
    })
    .await
}

pub async fn solver_health(state: &AppState) -> CommandResult<SolverHealth> {
    state
        .planning()
        .solver_health()
        .await
        .map_err(CommandError::from)
}
