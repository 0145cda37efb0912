pub mod memory;
pub mod notifier;

pub use memory::{InMemoryModuleRepository, InMemoryWorkflowRepository};
pub use notifier::{LoggingNotifier, RecordingNotifier};
