//! Driver-level errors.
//!
//! Problems in the program being compiled are [`Diagnostic`](crate::diagnostic::Diagnostic)s;
//! this type covers everything around them: reading inputs, decoding unit
//! descriptions, resolving targets.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in '{origin}': {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid target name '{0}'")]
    InvalidTargetName(String),

    #[error("unknown target '{name}' (looked for '{looked_for}')")]
    UnknownTarget { name: String, looked_for: String },

    #[error("invalid target config '{origin}': {message}")]
    TargetConfig { origin: String, message: String },

    #[error("invalid unit description: {0}")]
    Unit(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(origin: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            origin: origin.into(),
            source,
        }
    }
}
