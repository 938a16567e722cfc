//! Lock transition
//!
//! Moves a task instance from `Pending` to `Locked`:
//! 1. Refuse locked tasks, blank commentary, and locks at or after the
//!    shift cutoff
//! 2. Measure TAT as whole minutes between scheduled and lock time
//! 3. Compare against the routine's `tat_minutes`
//! 4. Commit the task update together with its audit row
//!
//! Nothing is retried. A failed commit leaves the task `Pending`.

use crate::backend::Backend;
use crate::clock::Clock;
use crate::config::ShiftPolicy;
use crate::error::LockError;
use crate::types::{
    AccessToken, AuditAction, AuditDetails, Evidence, LockCommit, NewAuditRecord, TaskId,
    TaskInstance, TaskLockUpdate, TaskStatus, UserProfile,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Whole minutes from `scheduled` to `locked`.
///
/// Halves round toward positive infinity, so -1.5 becomes -1 and 49.5
/// becomes 50. Early locks give negative values.
#[must_use]
pub fn tat_minutes_between(scheduled: DateTime<Utc>, locked: DateTime<Utc>) -> i64 {
    let elapsed_ms = (locked - scheduled).num_milliseconds();
    (elapsed_ms + 30_000).div_euclid(60_000)
}

/// `true` only when a threshold is known and strictly exceeded
#[inline]
#[must_use]
pub fn is_breach(tat_actual_minutes: i64, threshold_minutes: Option<i64>) -> bool {
    threshold_minutes.is_some_and(|threshold| tat_actual_minutes > threshold)
}

/// Operator input for a lock
#[derive(Debug, Clone)]
pub struct LockRequest {
    /// Task as last read from the backend
    pub task: TaskInstance,
    /// Free-text commentary
    pub commentary: String,
    /// Evidence links
    pub evidence: Evidence,
}

impl LockRequest {
    /// Create new lock request
    #[inline]
    #[must_use]
    pub fn new(task: TaskInstance, commentary: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            task,
            commentary: commentary.into(),
            evidence,
        }
    }
}

/// Metrics of a completed lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    /// Locked task
    pub task_id: TaskId,
    /// Lock time
    pub locked_time: DateTime<Utc>,
    /// Measured TAT
    pub tat_actual_minutes: i64,
    /// Routine threshold, if the routine could be read
    pub tat_threshold_minutes: Option<i64>,
    /// Breach flag
    pub tat_breached: bool,
}

impl LockOutcome {
    /// Confirmation line for the operator
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Task locked. TAT: {}min {}",
            self.tat_actual_minutes,
            if self.tat_breached { "(BREACH!)" } else { "(OK)" }
        )
    }
}

/// Executes lock transitions against the backend
#[derive(Clone)]
pub struct LockService {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    shift: ShiftPolicy,
}

impl std::fmt::Debug for LockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockService")
            .field("shift", &self.shift)
            .finish_non_exhaustive()
    }
}

impl LockService {
    /// Create new lock service
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>, shift: ShiftPolicy) -> Self {
        Self {
            backend,
            clock,
            shift,
        }
    }

    /// Shift policy in force
    #[inline]
    #[must_use]
    pub fn shift(&self) -> ShiftPolicy {
        self.shift
    }

    /// Check a lock request without touching the backend
    pub fn validate(&self, request: &LockRequest, now: DateTime<Utc>) -> Result<(), LockError> {
        if request.task.is_locked() {
            return Err(LockError::AlreadyLocked(request.task.id.clone()));
        }
        if request.commentary.trim().is_empty() {
            return Err(LockError::EmptyCommentary);
        }
        if self.shift.has_ended(now) {
            return Err(LockError::ShiftEnded {
                end_hour: self.shift.end_hour,
            });
        }
        Ok(())
    }

    /// Lock a task on behalf of `actor`
    ///
    /// # Errors
    /// - any rejection from [`LockService::validate`]; no backend call is made
    /// - `LockError::Persistence` if the commit fails
    pub async fn lock(
        &self,
        token: &AccessToken,
        actor: &UserProfile,
        request: LockRequest,
    ) -> Result<LockOutcome, LockError> {
        let locked_time = self.clock.now();
        self.validate(&request, locked_time)?;

        let task = &request.task;
        let tat_actual_minutes = tat_minutes_between(task.scheduled_time, locked_time);

        let tat_threshold_minutes = match self.backend.fetch_routine(token, &task.routine_id).await {
            Ok(Some(routine)) => Some(routine.tat_minutes),
            Ok(None) => {
                tracing::warn!(task = %task.id, routine = %task.routine_id, "routine not found, breach not evaluated");
                None
            }
            Err(e) => {
                tracing::warn!(task = %task.id, routine = %task.routine_id, error = %e, "routine lookup failed, breach not evaluated");
                None
            }
        };
        let tat_breached = is_breach(tat_actual_minutes, tat_threshold_minutes);

        let commit = LockCommit {
            task_id: task.id.clone(),
            update: TaskLockUpdate {
                status: TaskStatus::Locked,
                commentary: request.commentary.clone(),
                evidence: request.evidence.clone(),
                assigned_operator: actor.id,
                locked_time,
                tat_actual_minutes,
                tat_breached,
            },
            audit: NewAuditRecord {
                task_id: task.id.clone(),
                action: AuditAction::Locked,
                actor_id: actor.id,
                actor_role: actor.role,
                details: AuditDetails {
                    tat_actual_minutes,
                    tat_breached,
                },
            },
        };

        if let Err(e) = self.backend.commit_lock(token, &commit).await {
            tracing::error!(task = %task.id, error = %e, "lock commit failed");
            return Err(LockError::Persistence(e));
        }

        tracing::info!(
            task = %task.id,
            operator = %actor.id,
            tat_actual_minutes,
            tat_breached,
            "task locked"
        );

        Ok(LockOutcome {
            task_id: task.id.clone(),
            locked_time,
            tat_actual_minutes,
            tat_threshold_minutes,
            tat_breached,
        })
    }
}
