mod orchestrator;
mod scheduler;

pub use orchestrator::{BatchOrchestrator, PassReport, RunRequest, TriggerKind};
pub use scheduler::BatchScheduler;
