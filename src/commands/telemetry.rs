use crate::models::telemetry::TelemetryEvent;
use crate::services::planning_service::{TelemetryAck, TelemetryInput};

use super::{run_blocking, AppState, CommandResult};

pub async fn telemetry_record(state: &AppState, payload: TelemetryInput) -> CommandResult<TelemetryAck> {
    let state = state.clone();
    run_blocking(move || state.planning().ingest_telemetry(payload)).await
}

pub async fn telemetry_list(state: &AppState, user_id: String) -> CommandResult<Vec<TelemetryEvent>> {
    let state = state.clone();
    run_blocking(move || state.planning().telemetry_events(&user_id)).await
}
