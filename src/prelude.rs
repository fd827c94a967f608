pub use tally_core::{HarnessError, LedgerError, WatchError};

use miette::Diagnostic;
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    #[diagnostic(code(tally::harness))]
    Harness(#[from] HarnessError),

    #[error("ledger error: {0}")]
    #[diagnostic(code(tally::ledger))]
    Ledger(#[from] LedgerError),

    #[error("expectation failed: {0}")]
    #[diagnostic(code(tally::expectation))]
    Expectation(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn config(text: impl Display) -> Error {
        Error::ConfigError(text.to_string())
    }

    pub fn expectation(text: impl Display) -> Error {
        Error::Expectation(text.to_string())
    }

    pub fn message(text: impl Into<String>) -> Error {
        Error::Message(text.into())
    }
}

impl From<WatchError> for Error {
    fn from(err: WatchError) -> Self {
        Error::Harness(err.into())
    }
}
