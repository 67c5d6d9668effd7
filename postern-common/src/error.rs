use std::io;

use thiserror::Error;

/// Errors raised while loading or parsing a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),

    /// A directive on the given line could not be parsed.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl ConfigError {
    pub(crate) fn at(line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            reason: reason.into(),
        }
    }
}
