//! Error taxonomy surfaced to the shell. All variants are non-fatal; the
//! emulator never aborts on any of them.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EmulatorError {
    /// A process with this name already exists (live or finished).
    #[error("process {name:?} already exists")]
    AlreadyExists { name: String },

    /// No attachable process with this name (nonexistent or finished).
    #[error("process {name:?} not found or finished")]
    NotFound { name: String },

    /// A scheduling or query request arrived before `initialize`.
    #[error("emulator is not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
