//! Error types for OpsFlow Core
//!
//! Provides error handling for:
//! - Hosted backend failures (transport, status, malformed rows)
//! - Lock transition rejections
//! - Session resolution
//! - Account and admin form validation
//! - Configuration loading

use crate::types::{Role, TaskId, UserId};

/// Generic message shown for any backend failure during a lock
pub const LOCK_FAILED_MESSAGE: &str = "Failed to lock task";

/// Main OpsFlow error type
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// Backend call failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Lock transition failed
    #[error("lock failed: {0}")]
    Lock(#[from] LockError),

    /// Session could not be resolved
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Account operation failed
    #[error("account error: {0}")]
    Account(#[from] AccountError),

    /// Admin operation failed
    #[error("admin error: {0}")]
    Admin(#[from] AdminError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures reported by the hosted data/auth service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Request never produced a response
    #[error("request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// Missing, expired or rejected credentials
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// Row did not decode into its typed record
    #[error("malformed {table} row: {reason}")]
    MalformedRow {
        /// Source table
        table: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Write refused because the row is not in the expected state
    #[error("conflict: {0}")]
    Conflict(String),
}

impl BackendError {
    /// Check if the failure means the caller's credentials are no good
    #[inline]
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
            || matches!(self, Self::Status { status, .. } if *status == 401 || *status == 403)
    }

    /// Message safe to show end users.
    ///
    /// Network, auth and constraint failures are not told apart here.
    #[inline]
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        "The request could not be completed. Please try again."
    }
}

/// Lock transition errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Task already carries status `Locked`
    #[error("task {0} is already locked")]
    AlreadyLocked(TaskId),

    /// Task is not visible to the operator
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// Commentary empty or whitespace-only
    #[error("Please enter commentary before locking")]
    EmptyCommentary,

    /// Wall-clock hour at or past the shift cutoff
    #[error("Shift ended at {end_hour:02}:00. No new locks allowed.")]
    ShiftEnded {
        /// Configured cutoff hour
        end_hour: u32,
    },

    /// Another lock from the same session is still outstanding
    #[error("A lock is already in progress")]
    InFlight,

    /// Persisting the lock failed
    #[error("persistence failed: {0}")]
    Persistence(#[from] BackendError),
}

impl LockError {
    /// Check if the lock was refused before any write was attempted
    #[inline]
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }

    /// Message shown to the operator
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Persistence(_) => LOCK_FAILED_MESSAGE.to_string(),
            Self::AlreadyLocked(_) => "This task is locked and can no longer be edited".to_string(),
            other => other.to_string(),
        }
    }
}

/// Login notice after the auth service stopped accepting the token
pub const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";

/// Login notice after the profile row could not be loaded
pub const PROFILE_UNAVAILABLE_NOTICE: &str =
    "Your operator profile could not be loaded. Please log in again.";

/// Session resolution errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session cookie or unknown session
    #[error("no active session")]
    NoSession,

    /// Auth service did not return an identity
    #[error("identity could not be resolved: {0}")]
    Identity(BackendError),

    /// Profile row missing or fetch failed
    #[error("profile unavailable for {user_id}: {reason}")]
    ProfileUnavailable {
        /// Authenticated identity
        user_id: UserId,
        /// Why the profile could not be used
        reason: String,
    },
}

impl SessionError {
    /// Check if the access token itself was turned away, so a refresh may help
    #[must_use]
    pub fn is_token_rejected(&self) -> bool {
        match self {
            Self::NoSession => true,
            Self::Identity(e) => e.is_auth_failure(),
            Self::ProfileUnavailable { .. } => false,
        }
    }

    /// Notice shown on the login page after the gate turned the request away
    #[must_use]
    pub fn login_notice(&self) -> Option<&'static str> {
        match self {
            Self::NoSession => None,
            Self::Identity(_) => Some(SESSION_EXPIRED_NOTICE),
            Self::ProfileUnavailable { .. } => Some(PROFILE_UNAVAILABLE_NOTICE),
        }
    }
}

/// Login / registration errors
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// Required form field left blank
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Department is not one of the configured names
    #[error("unknown department: {0}")]
    UnknownDepartment(String),

    /// Auth service refused the request
    #[error("{0}")]
    Backend(#[from] BackendError),
}

impl AccountError {
    /// Message shown on the login/register form
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Backend(BackendError::Status { message, .. })
            | Self::Backend(BackendError::Unauthenticated(message))
                if !message.is_empty() =>
            {
                message.clone()
            }
            Self::Backend(_) => fallback.to_string(),
            other => other.to_string(),
        }
    }
}

/// Admin reference-data errors
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Caller's role may not use the admin screen
    #[error("role {0} cannot manage reference data")]
    Forbidden(Role),

    /// Required routine fields missing
    #[error("Please fill in all required fields")]
    MissingRoutineFields,

    /// Department name missing
    #[error("Department name is required")]
    MissingDepartmentName,

    /// A field did not parse
    #[error("invalid {field}: {value:?}")]
    InvalidField {
        /// Form field name
        field: &'static str,
        /// Submitted value
        value: String,
    },

    /// Delete submitted without confirmation
    #[error("Deletion must be confirmed")]
    NotConfirmed,

    /// Backend write failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl AdminError {
    /// Message shown on the admin panel
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Backend(_) => fallback.to_string(),
            other => other.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required value absent from file and environment
    #[error("missing configuration value: {0}")]
    MissingValue(&'static str),

    /// Value present but unusable
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// What is wrong
        reason: String,
    },

    /// Config file could not be read
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for [`crate::AppConfig`]
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
