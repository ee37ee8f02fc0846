//! Tracing and logging setup shared by every aperture process.

pub mod tracing;

pub use crate::tracing::{init, init_with_format, LogFormat};
