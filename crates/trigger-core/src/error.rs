use thiserror::Error;

/// Failure reported by a [`crate::PlatformClient`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("conflicting remote state: {reason}")]
    Conflict { reason: String },

    #[error("transient transport failure: {reason}")]
    Transient { reason: String },

    #[error("request rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("unexpected platform response: {reason}")]
    Decode { reason: String },
}

impl PlatformError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Timeouts, connection failures and 5xx responses; the only errors retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// A rejected credential fails every later call the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Delete outcomes meaning the resource is already gone.
    pub fn is_already_absent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Conflict { .. })
    }
}

/// Result alias for platform calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors that abort the whole run instead of a single flow.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("platform rejected the credential: {0}")]
    Unauthorized(#[source] PlatformError),

    #[error("flow enumeration failed: {0}")]
    Enumeration(#[source] PlatformError),
}

impl FatalError {
    /// Classifies an error raised while enumerating flows.
    pub fn enumeration(err: PlatformError) -> Self {
        if err.is_fatal() {
            Self::Unauthorized(err)
        } else {
            Self::Enumeration(err)
        }
    }
}
