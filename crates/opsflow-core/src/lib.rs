//! OpsFlow Core - routine tracking for operations shifts
//!
//! Domain logic behind the shift hub:
//! - Resolves the signed-in operator and their profile (fail closed)
//! - Loads today's task instances for the operator's department
//! - Locks tasks, measuring TAT against the routine SLA and writing the
//!   audit record in the same commit
//! - Edits routines and departments for admins
//!
//! Storage and auth live behind the [`Backend`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use opsflow_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(token: AccessToken, task: TaskInstance, me: UserProfile) -> Result<(), LockError> {
//! let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
//! let locks = LockService::new(backend, Arc::new(SystemClock), ShiftPolicy::default());
//!
//! let outcome = locks
//!     .lock(&token, &me, LockRequest::new(task, "reconciled", Evidence::new()))
//!     .await?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod account;
pub mod admin;
pub mod backend;
pub mod clock;
pub mod config;
pub mod draft;
pub mod error;
pub mod lock;
pub mod memory;
pub mod session;
pub mod tasks;
pub mod types;

// Re-exports for convenience
pub use account::{Accounts, LoginForm, RegisterForm};
pub use admin::{AdminEditor, DeleteForm, DepartmentForm, RoutineForm};
pub use backend::{Backend, TaskQuery};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, ShiftPolicy};
pub use draft::LockDraft;
pub use error::{
    AccountError, AdminError, BackendError, ConfigError, LockError, OpsError, SessionError,
    LOCK_FAILED_MESSAGE, PROFILE_UNAVAILABLE_NOTICE, SESSION_EXPIRED_NOTICE,
};
pub use lock::{is_breach, tat_minutes_between, LockOutcome, LockRequest, LockService};
pub use memory::InMemoryBackend;
pub use session::{Operator, Resolved, SessionGate};
pub use tasks::{utc_day, TaskBoard};
pub use types::{
    AccessToken, AuditAction, AuditDetails, AuditId, AuditRecord, AuthSession, ClockTime,
    Department, DepartmentId, Evidence, Frequency, Identity, LockCommit, NewAuditRecord,
    NewDepartment, NewRoutine, RefreshToken, Role, Routine, RoutineId, SignUp, TaskId,
    TaskInstance, TaskLockUpdate, TaskStatus, UserId, UserProfile,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with OpsFlow Core
    pub use crate::{
        AccessToken, AppConfig, Backend, Evidence, InMemoryBackend, LockError, LockRequest,
        LockService, Role, ShiftPolicy, SystemClock, TaskBoard, TaskId, TaskInstance,
        UserProfile,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
