pub mod committed_block_repository;
pub mod fixed_event_repository;
pub mod idempotency_repository;
pub mod preferences_repository;
pub mod task_repository;
pub mod telemetry_repository;
