pub mod modules;
pub mod scheduler;
pub mod workflows;
pub mod ws;
