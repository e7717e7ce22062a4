pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod moderation;
pub mod permission;
pub mod storage;
pub mod workflow;

pub use config::{Config, LifecyclePolicy};
pub use error::{AgoraError, Result};
pub use lifecycle::{DraftCandidate, LifecycleStateMachine, SubmitOutcome};
pub use moderation::ModerationQueue;
pub use permission::{Capabilities, PermissionResolver};
pub use storage::SqliteStore;
pub use workflow::{StepOutcome, StepPayload, StepWorkflowEngine};
