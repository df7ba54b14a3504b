//! Errors surfaced by `usegate` commands. Each maps to exit status 1.

use usegate_core::allowlist::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// An allowlist operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// `validate` was asked about an identifier that is not allowed.
    #[error("use case '{id}' is not allowed")]
    Denied { id: String },

    /// Writing to stdout or reading the confirmation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;
