pub mod consumer;
pub mod dispatcher;
pub mod handlers;
pub mod registry;

pub use consumer::{connect_with_retry, EventConsumer};
pub use dispatcher::{DispatchError, DispatchSummary, EventDispatcher};
pub use registry::{EventHandler, HandlerRegistry, RecipientSpec, Route};
