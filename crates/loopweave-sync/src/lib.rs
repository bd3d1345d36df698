mod client;
mod error;
mod types;

pub mod doctor;

pub use client::*;
pub use error::SyncError;
pub use types::WorkflowSummary;
