pub mod entities;
pub mod messages;
pub mod repositories;
pub mod requirement;

pub use entities::{
    ExecuteModuleEntry, Job, JobRecord, JobRecordState, Module, ShiftUnit, TimeShift, Workflow,
};
pub use messages::{
    ExecuteMeta, FailureNotification, FailureReason, Frame, ResultFrame, ResultStatus,
};
pub use repositories::{ModuleRepository, Notifier, WorkflowRepository};
pub use requirement::{FieldKind, NormalizedRequirement, RequirementCheck};
