//! Serialized, cancellable execution of inference requests

mod queue;
mod request;

pub use queue::RequestQueue;
pub use request::{ChunkCallback, RequestInput, ResponseHandle, SubmitOptions};
