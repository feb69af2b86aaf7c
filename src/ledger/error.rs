//! Error taxonomy shared by the ledger core.

use thiserror::Error;

use crate::ledger::currency::Currency;

/// Failures the conversation engine knows how to act on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Bad user input. Recovered locally by re-prompting.
    #[error("{0}")]
    Validation(String),

    /// The spreadsheet could not be reached or returned garbage.
    #[error("spreadsheet unavailable: {0}")]
    SourceUnavailable(String),

    /// An exchange rate could not be fetched.
    #[error("exchange rate {from}->{to} unavailable: {reason}")]
    RateUnavailable {
        from: Currency,
        to: Currency,
        reason: String,
    },

    /// A conversation went stale and was dropped.
    #[error("conversation expired")]
    StateExpired,
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
