pub mod block;
pub mod fixed_event;
pub mod idempotency;
pub mod preferences;
pub mod task;
pub mod telemetry;
