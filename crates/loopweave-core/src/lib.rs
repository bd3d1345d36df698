mod error;
mod graph;
pub mod reachability;
pub mod repair;
pub mod storage;
mod validation;
mod workflow;

pub use error::GraphError;
pub use graph::Graph;
pub use repair::{Change, RepairOutcome, RepairPlan, RepairSession, repair_loop, repair_until_clean};
pub use validation::*;
pub use workflow::*;
