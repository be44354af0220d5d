//! High-level wiring for the command line entry points.

pub mod builder;
pub mod shutdown;

pub use builder::{build_engine, build_engine_with_fetcher, BuildError};
pub use shutdown::setup_shutdown_handler;
