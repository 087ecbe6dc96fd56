use std::{
    error::Error,
    fmt::{self, Display},
};

use ctlutils::CtlutilsError;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a corectl-related operation.
pub type CorectlResult<T> = Result<T, CorectlError>;

/// An error that occurred during a corectl operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum CorectlError {
    /// A flag value, path or identifier supplied by the user is not acceptable.
    #[error("invalid input: {0}")]
    UserInput(String),

    /// An identity or resource is already claimed by a live instance.
    #[error("{resource} is already in use by instance `{instance}`")]
    Conflict {
        /// The contested identity or resource.
        resource: String,

        /// The name of the live instance holding it.
        instance: String,
    },

    /// A downloaded artifact failed signature or digest verification.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Upstream could not be reached and nothing usable is available locally.
    #[error("offline and no local image available for the `{0}` channel")]
    Offline(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A subprocess could not be started or reported failure.
    #[error("process error: {0}")]
    Process(String),

    /// No live instance matches the given name or UUID.
    #[error("instance `{0}` not found, or dead")]
    InstanceNotFound(String),

    /// The operation needs an effective uid of 0.
    #[error("not enough privileges to {0}, use `sudo`")]
    NotPrivileged(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// A malformed semantic version.
    #[error("invalid version: {0}")]
    Semver(#[from] semver::Error),

    /// An error from the ctlutils crate.
    #[error(transparent)]
    Ctlutils(#[from] CtlutilsError),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that can represent any error.
    #[error(transparent)]
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

impl CorectlError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> CorectlError {
        CorectlError::Custom(AnyError {
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
