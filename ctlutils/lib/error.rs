//! `ctlutils::error` is a module containing error utilities for the corectl project.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a ctlutils-related operation.
pub type CtlutilsResult<T> = Result<T, CtlutilsError>;

/// An error that occurred in one of the ctlutils modules.
#[derive(pretty_error_debug::Debug, Error)]
pub enum CtlutilsError {
    /// The archive header did not start with the expected magic number.
    #[error("invalid archive header: did not find valid magic number")]
    InvalidHeader,

    /// A hexadecimal header field could not be parsed.
    #[error("invalid archive header field `{field}`: {value:?}")]
    HeaderField {
        /// The name of the offending field.
        field: &'static str,

        /// The raw field contents.
        value: String,
    },

    /// More payload bytes were written than the header declared.
    #[error("payload overflow: entry `{name}` accepts only {available} more bytes")]
    PayloadOverflow {
        /// The name of the entry being written.
        name: String,

        /// How many payload bytes the entry could still take.
        available: u64,
    },

    /// A new header was started before the previous payload was complete.
    #[error("short payload: entry `{name}` is missing {missing} bytes")]
    ShortPayload {
        /// The name of the entry being written.
        name: String,

        /// How many declared bytes were never written.
        missing: u64,
    },

    /// An error that occurred when resolving a binary
    #[error("binary not found at: {0}\nSource: {1}")]
    BinaryNotFound(String, String),

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CtlutilsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> CtlutilsError {
        CtlutilsError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

impl From<CtlutilsError> for std::io::Error {
    fn from(error: CtlutilsError) -> Self {
        match error {
            CtlutilsError::IoError(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
