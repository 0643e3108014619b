pub mod api;
pub mod callgraph;
pub mod check;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod integration;
pub mod kernel;
pub mod logging;
pub mod names;
pub mod span;
pub mod types;
pub mod visit;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-exports: the driver surface used by the CLI and integration tests
pub use api::{CompileOutput, DeviceCompiler, InvocationKind, LaunchSite, Unit};
pub use config::TargetConfig;
pub use error::{Error, Result};
pub use integration::emit::render_header;
