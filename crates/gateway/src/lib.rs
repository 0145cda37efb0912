pub mod registry;
pub mod session;
pub mod ws;

pub use registry::ModuleRegistry;
pub use session::{CloseReason, GatewayEvent, SessionGateway, SessionHandle};
pub use ws::ConnectionContext;
