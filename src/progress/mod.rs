//! Progress reporting for engine loading

mod handler;
mod hub;
mod logging;

pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use hub::{ProgressHub, ProgressReporter, Subscription};
pub use logging::LoggingHandler;
