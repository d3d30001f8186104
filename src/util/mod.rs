//! Utility modules for local-inference

pub mod logging;
