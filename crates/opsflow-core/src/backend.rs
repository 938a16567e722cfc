//! Hosted backend seam
//!
//! Everything durable (auth identities, the five tables, transactional
//! guarantees) lives behind this trait. The REST implementation lives in
//! `opsflow-backend`; [`crate::memory::InMemoryBackend`] backs tests and the
//! offline demo.

use crate::error::BackendError;
use crate::types::{
    AccessToken, AuditRecord, AuthSession, Department, DepartmentId, Identity, LockCommit,
    NewDepartment, NewRoutine, RefreshToken, Routine, RoutineId, SignUp, TaskId, TaskInstance,
    UserId, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Task-list filter: one department, one half-open time window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    /// Department name
    pub department: String,
    /// Inclusive lower bound on `scheduled_time`
    pub from: DateTime<Utc>,
    /// Exclusive upper bound on `scheduled_time`
    pub until: DateTime<Utc>,
}

impl TaskQuery {
    /// Check if a task falls inside this query
    #[must_use]
    pub fn matches(&self, task: &TaskInstance) -> bool {
        task.department == self.department
            && task.scheduled_time >= self.from
            && task.scheduled_time < self.until
    }
}

/// Hosted relational-data + auth service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Password sign-in
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError>;

    /// Create an auth identity
    async fn sign_up(&self, request: &SignUp) -> Result<(), BackendError>;

    /// Trade a refresh token for a new session
    async fn refresh_session(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<AuthSession, BackendError>;

    /// Revoke the session behind `token`
    async fn sign_out(&self, token: &AccessToken) -> Result<(), BackendError>;

    /// Identity for `token`, `None` if the token is not recognised
    async fn current_user(&self, token: &AccessToken) -> Result<Option<Identity>, BackendError>;

    /// `users` row for an identity
    async fn fetch_profile(
        &self,
        token: &AccessToken,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, BackendError>;

    /// Task instances matching `query`, ordered by `scheduled_time` ascending
    async fn list_tasks(
        &self,
        token: &AccessToken,
        query: &TaskQuery,
    ) -> Result<Vec<TaskInstance>, BackendError>;

    /// Single task instance
    async fn fetch_task(
        &self,
        token: &AccessToken,
        task_id: &TaskId,
    ) -> Result<Option<TaskInstance>, BackendError>;

    /// Single routine
    async fn fetch_routine(
        &self,
        token: &AccessToken,
        routine_id: &RoutineId,
    ) -> Result<Option<Routine>, BackendError>;

    /// Apply the task update and append its audit row atomically.
    ///
    /// Fails with [`BackendError::Conflict`] if the task is not `Pending`.
    async fn commit_lock(&self, token: &AccessToken, commit: &LockCommit)
        -> Result<(), BackendError>;

    /// All routines ordered by id
    async fn list_routines(&self, token: &AccessToken) -> Result<Vec<Routine>, BackendError>;

    /// All departments ordered by name
    async fn list_departments(&self, token: &AccessToken)
        -> Result<Vec<Department>, BackendError>;

    /// Insert a routine
    async fn insert_routine(
        &self,
        token: &AccessToken,
        routine: &NewRoutine,
    ) -> Result<(), BackendError>;

    /// Insert a department
    async fn insert_department(
        &self,
        token: &AccessToken,
        department: &NewDepartment,
    ) -> Result<(), BackendError>;

    /// Delete a routine
    async fn delete_routine(
        &self,
        token: &AccessToken,
        routine_id: &RoutineId,
    ) -> Result<(), BackendError>;

    /// Delete a department
    async fn delete_department(
        &self,
        token: &AccessToken,
        department_id: &DepartmentId,
    ) -> Result<(), BackendError>;

    /// Most recent audit rows, newest first
    async fn list_audit(
        &self,
        token: &AccessToken,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, BackendError>;
}
