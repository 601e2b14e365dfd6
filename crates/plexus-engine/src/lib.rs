mod approval;
mod context;
mod controller;
mod engine;
mod executors;
mod scheduler;

pub use approval::ApprovalBroker;
pub use context::{ExecutionContext, NodeResult};
pub use controller::RunStatusUpdate;
pub use engine::{Engine, EngineBuilder, RunOptions};
pub use scheduler::Scheduler;

/// Hard engine ceiling on loop passes, independent of per-node
/// configuration.
pub const MAX_LOOP_ITERATIONS: u32 = 100;
