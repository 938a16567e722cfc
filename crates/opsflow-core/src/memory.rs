//! In-process [`Backend`]
//!
//! Keeps every table in one `RwLock`ed state so a lock commit (task update
//! plus audit append) happens inside a single critical section. Used by the
//! test suites and by `opsflow serve --in-memory`.

use crate::backend::{Backend, TaskQuery};
use crate::error::BackendError;
use crate::tasks::utc_day;
use crate::types::{
    AccessToken, AuditId, AuditRecord, AuthSession, ClockTime, Department, DepartmentId,
    Frequency, Identity, LockCommit, NewDepartment, NewRoutine, RefreshToken, Role, Routine,
    RoutineId, SignUp, TaskId, TaskInstance, TaskStatus, UserId, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    user_id: UserId,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, UserId>,
    refresh_tokens: HashMap<String, UserId>,
    profiles: HashMap<UserId, UserProfile>,
    departments: Vec<Department>,
    routines: Vec<Routine>,
    tasks: Vec<TaskInstance>,
    audit: Vec<AuditRecord>,
    next_department: u64,
    next_audit: u64,
}

impl State {
    fn authorize(&self, token: &AccessToken) -> Result<UserId, BackendError> {
        self.tokens
            .get(token.expose())
            .copied()
            .ok_or_else(|| BackendError::Unauthenticated("invalid JWT".to_string()))
    }

    fn issue_token(&mut self, user_id: UserId) -> AccessToken {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), user_id);
        AccessToken::new(token)
    }

    fn issue_session(&mut self, user_id: UserId) -> AuthSession {
        let access_token = self.issue_token(user_id);
        let refresh_token = Uuid::new_v4().simple().to_string();
        self.refresh_tokens.insert(refresh_token.clone(), user_id);
        AuthSession {
            access_token,
            refresh_token: Some(RefreshToken::new(refresh_token)),
            expires_in: Some(3600),
            user: Identity {
                id: user_id,
                email: self.profiles.get(&user_id).and_then(|p| p.email.clone()),
            },
        }
    }
}

/// Backend held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
    fail_commits: AtomicBool,
}

impl InMemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend seeded with demo accounts, reference data and today's tasks.
    ///
    /// Accounts: `admin@opsflow.local` / `admin` (admin) and
    /// `operator@opsflow.local` / `operator` (operator), both in Disbursement.
    #[must_use]
    pub fn with_demo_data(now: DateTime<Utc>) -> Self {
        let backend = Self::new();
        backend.add_account(
            "admin@opsflow.local",
            "admin",
            "Ops Admin",
            "Disbursement",
            Role::Admin,
        );
        backend.add_account(
            "operator@opsflow.local",
            "operator",
            "Shift Operator",
            "Disbursement",
            Role::Operator,
        );

        for (name, description) in [
            ("Disbursement", "Loan disbursement operations"),
            ("Repayment", "Repayment collection and posting"),
            ("Operational Excellence", "Controls and process quality"),
        ] {
            backend.add_department(name, Some(description));
        }

        let routines = [
            ("OPS-CASH-001", "Cash position reconciliation", "1", 45),
            ("OPS-DISB-002", "Disbursement batch release", "1", 30),
            ("OPS-REPAY-001", "Repayment file posting", "2", 60),
        ];
        for (id, name, department_id, tat_minutes) in routines {
            backend.add_routine(Routine {
                id: RoutineId::new(id),
                name: name.to_string(),
                department_id: DepartmentId::new(department_id),
                frequency: Frequency::Daily,
                repeat_interval_minutes: Some(120),
                start_time: ClockTime::from_hm(8, 0),
                end_time: ClockTime::from_hm(17, 0),
                tat_minutes,
                description: None,
                created_by: None,
                is_active: true,
            });
        }

        let (day_start, _) = utc_day(now);
        let mut n = 0;
        for (routine, department) in [
            ("OPS-CASH-001", "Disbursement"),
            ("OPS-DISB-002", "Disbursement"),
            ("OPS-REPAY-001", "Repayment"),
        ] {
            for hour in [8, 10, 12, 14, 16] {
                n += 1;
                backend.add_task(TaskInstance::pending(
                    n.to_string(),
                    routine,
                    department,
                    day_start + Duration::hours(hour),
                ));
            }
        }
        backend
    }

    /// Register an account and its profile row directly
    pub fn add_account(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        department: &str,
        role: Role,
    ) -> UserId {
        let user_id = UserId::new();
        let mut state = self.state.write();
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user_id,
            },
        );
        state.profiles.insert(
            user_id,
            UserProfile {
                id: user_id,
                email: Some(email.to_string()),
                full_name: Some(full_name.to_string()),
                department: department.to_string(),
                role,
            },
        );
        user_id
    }

    /// Issue a token for an existing account without a password round trip
    pub fn issue_token(&self, user_id: UserId) -> AccessToken {
        self.state.write().issue_token(user_id)
    }

    /// Drop an access token as if it had expired. Refresh tokens stay valid.
    pub fn expire_token(&self, token: &AccessToken) -> bool {
        self.state.write().tokens.remove(token.expose()).is_some()
    }

    /// Delete a profile row, leaving the identity in place
    pub fn remove_profile(&self, user_id: UserId) -> Option<UserProfile> {
        self.state.write().profiles.remove(&user_id)
    }

    /// Insert a department row, returning its id
    pub fn add_department(&self, name: &str, description: Option<&str>) -> DepartmentId {
        let mut state = self.state.write();
        state.next_department += 1;
        let id = DepartmentId::new(state.next_department.to_string());
        state.departments.push(Department {
            id: id.clone(),
            name: name.to_string(),
            description: description.map(str::to_string),
            operating_hours_start: ClockTime::from_hm(8, 0),
            operating_hours_end: ClockTime::from_hm(17, 0),
        });
        id
    }

    /// Insert or replace a routine row
    pub fn add_routine(&self, routine: Routine) {
        let mut state = self.state.write();
        state.routines.retain(|r| r.id != routine.id);
        state.routines.push(routine);
    }

    /// Insert or replace a task row
    pub fn add_task(&self, task: TaskInstance) {
        let mut state = self.state.write();
        state.tasks.retain(|t| t.id != task.id);
        state.tasks.push(task);
    }

    /// Current copy of a task row
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<TaskInstance> {
        self.state.read().tasks.iter().find(|t| &t.id == task_id).cloned()
    }

    /// Audit rows in insertion order
    #[must_use]
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.read().audit.clone()
    }

    /// Routine rows in insertion order
    #[must_use]
    pub fn routines(&self) -> Vec<Routine> {
        self.state.read().routines.clone()
    }

    /// Department rows in insertion order
    #[must_use]
    pub fn departments(&self) -> Vec<Department> {
        self.state.read().departments.clone()
    }

    /// Make every subsequent lock commit fail
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError> {
        let mut state = self.state.write();
        let account = state
            .accounts
            .get(email)
            .filter(|a| a.password == password)
            .cloned()
            .ok_or_else(|| BackendError::Status {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })?;
        let mut session = state.issue_session(account.user_id);
        session.user.email = Some(email.to_string());
        Ok(session)
    }

    async fn sign_up(&self, request: &SignUp) -> Result<(), BackendError> {
        if self.state.read().accounts.contains_key(&request.email) {
            return Err(BackendError::Status {
                status: 422,
                message: "User already registered".to_string(),
            });
        }
        self.add_account(
            &request.email,
            &request.password,
            &request.full_name,
            &request.department,
            Role::Operator,
        );
        Ok(())
    }

    async fn refresh_session(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<AuthSession, BackendError> {
        let mut state = self.state.write();
        let user_id = state
            .refresh_tokens
            .remove(refresh_token.expose())
            .ok_or_else(|| BackendError::Status {
                status: 400,
                message: "Invalid Refresh Token: Refresh Token Not Found".to_string(),
            })?;
        Ok(state.issue_session(user_id))
    }

    async fn sign_out(&self, token: &AccessToken) -> Result<(), BackendError> {
        let mut state = self.state.write();
        if let Some(user_id) = state.tokens.remove(token.expose()) {
            state.refresh_tokens.retain(|_, owner| *owner != user_id);
        }
        Ok(())
    }

    async fn current_user(&self, token: &AccessToken) -> Result<Option<Identity>, BackendError> {
        let state = self.state.read();
        Ok(state.tokens.get(token.expose()).map(|id| Identity {
            id: *id,
            email: state.profiles.get(id).and_then(|p| p.email.clone()),
        }))
    }

    async fn fetch_profile(
        &self,
        token: &AccessToken,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        Ok(state.profiles.get(&user_id).cloned())
    }

    async fn list_tasks(
        &self,
        token: &AccessToken,
        query: &TaskQuery,
    ) -> Result<Vec<TaskInstance>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        let mut tasks: Vec<_> = state
            .tasks
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.scheduled_time);
        Ok(tasks)
    }

    async fn fetch_task(
        &self,
        token: &AccessToken,
        task_id: &TaskId,
    ) -> Result<Option<TaskInstance>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        Ok(state.tasks.iter().find(|t| &t.id == task_id).cloned())
    }

    async fn fetch_routine(
        &self,
        token: &AccessToken,
        routine_id: &RoutineId,
    ) -> Result<Option<Routine>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        Ok(state.routines.iter().find(|r| &r.id == routine_id).cloned())
    }

    async fn commit_lock(
        &self,
        token: &AccessToken,
        commit: &LockCommit,
    ) -> Result<(), BackendError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.authorize(token)?;

        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == commit.task_id)
            .filter(|t| t.status == TaskStatus::Pending)
            .ok_or_else(|| {
                BackendError::Conflict(format!("task {} is not pending", commit.task_id))
            })?;

        let update = &commit.update;
        task.status = update.status;
        task.commentary = Some(update.commentary.clone());
        task.evidence = update.evidence.clone();
        task.assigned_operator = Some(update.assigned_operator);
        task.locked_time = Some(update.locked_time);
        task.tat_actual_minutes = Some(update.tat_actual_minutes);
        task.tat_breached = Some(update.tat_breached);

        state.next_audit += 1;
        state.audit.push(AuditRecord {
            id: Some(AuditId::new(state.next_audit.to_string())),
            task_id: commit.audit.task_id.clone(),
            action: commit.audit.action,
            actor_id: Some(commit.audit.actor_id),
            actor_role: Some(commit.audit.actor_role),
            details: commit.audit.details,
            created_at: Some(update.locked_time),
        });
        Ok(())
    }

    async fn list_routines(&self, token: &AccessToken) -> Result<Vec<Routine>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        let mut routines = state.routines.clone();
        routines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(routines)
    }

    async fn list_departments(&self, token: &AccessToken) -> Result<Vec<Department>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        let mut departments = state.departments.clone();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(departments)
    }

    async fn insert_routine(
        &self,
        token: &AccessToken,
        routine: &NewRoutine,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write();
        state.authorize(token)?;
        if state.routines.iter().any(|r| r.id == routine.id) {
            return Err(BackendError::Status {
                status: 409,
                message: "duplicate key value violates unique constraint \"routines_pkey\""
                    .to_string(),
            });
        }
        state.routines.push(Routine {
            id: routine.id.clone(),
            name: routine.name.clone(),
            department_id: routine.department_id.clone(),
            frequency: routine.frequency,
            repeat_interval_minutes: Some(routine.repeat_interval_minutes),
            start_time: Some(routine.start_time),
            end_time: Some(routine.end_time),
            tat_minutes: routine.tat_minutes,
            description: Some(routine.description.clone()).filter(|d| !d.is_empty()),
            created_by: Some(routine.created_by),
            is_active: routine.is_active,
        });
        Ok(())
    }

    async fn insert_department(
        &self,
        token: &AccessToken,
        department: &NewDepartment,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write();
        state.authorize(token)?;
        state.next_department += 1;
        let id = DepartmentId::new(state.next_department.to_string());
        state.departments.push(Department {
            id,
            name: department.name.clone(),
            description: Some(department.description.clone()).filter(|d| !d.is_empty()),
            operating_hours_start: Some(department.operating_hours_start),
            operating_hours_end: Some(department.operating_hours_end),
        });
        Ok(())
    }

    async fn delete_routine(
        &self,
        token: &AccessToken,
        routine_id: &RoutineId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write();
        state.authorize(token)?;
        state.routines.retain(|r| &r.id != routine_id);
        Ok(())
    }

    async fn delete_department(
        &self,
        token: &AccessToken,
        department_id: &DepartmentId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write();
        state.authorize(token)?;
        state.departments.retain(|d| &d.id != department_id);
        Ok(())
    }

    async fn list_audit(
        &self,
        token: &AccessToken,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, BackendError> {
        let state = self.state.read();
        state.authorize(token)?;
        let mut records = state.audit.clone();
        records.reverse();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditAction, AuditDetails, Evidence, NewAuditRecord, TaskLockUpdate};

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().unwrap()
    }

    fn commit(task: &str, actor: UserId, locked_time: DateTime<Utc>) -> LockCommit {
        LockCommit {
            task_id: TaskId::new(task),
            update: TaskLockUpdate {
                status: TaskStatus::Locked,
                commentary: "done".into(),
                evidence: Evidence::new(),
                assigned_operator: actor,
                locked_time,
                tat_actual_minutes: 5,
                tat_breached: false,
            },
            audit: NewAuditRecord {
                task_id: TaskId::new(task),
                action: AuditAction::Locked,
                actor_id: actor,
                actor_role: Role::Operator,
                details: AuditDetails {
                    tat_actual_minutes: 5,
                    tat_breached: false,
                },
            },
        }
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let backend = InMemoryBackend::new();
        backend.add_account("a@b.c", "pw", "A", "Repayment", Role::Operator);

        assert!(backend.sign_in("a@b.c", "wrong").await.is_err());
        let session = backend.sign_in("a@b.c", "pw").await.unwrap();
        let identity = backend
            .current_user(&session.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.id, session.user.id);

        backend.sign_out(&session.access_token).await.unwrap();
        assert!(backend
            .current_user(&session.access_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let backend = InMemoryBackend::new();
        let user_id = backend.add_account("a@b.c", "pw", "A", "Repayment", Role::Operator);
        let session = backend.sign_in("a@b.c", "pw").await.unwrap();
        let first = session.refresh_token.clone().unwrap();

        assert!(backend.expire_token(&session.access_token));
        assert!(backend.current_user(&session.access_token).await.unwrap().is_none());

        let renewed = backend.refresh_session(&first).await.unwrap();
        assert_eq!(renewed.user.id, user_id);
        assert_ne!(renewed.access_token, session.access_token);
        assert!(backend.current_user(&renewed.access_token).await.unwrap().is_some());

        // refresh tokens are single use
        assert!(matches!(
            backend.refresh_session(&first).await,
            Err(BackendError::Status { status: 400, .. })
        ));

        let second = renewed.refresh_token.clone().unwrap();
        backend.sign_out(&renewed.access_token).await.unwrap();
        assert!(backend.refresh_session(&second).await.is_err());
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicates() {
        let backend = InMemoryBackend::new();
        let request = SignUp {
            email: "new@b.c".into(),
            password: "pw".into(),
            full_name: "New".into(),
            department: "Repayment".into(),
        };
        backend.sign_up(&request).await.unwrap();
        assert!(matches!(
            backend.sign_up(&request).await,
            Err(BackendError::Status { status: 422, .. })
        ));
    }

    #[tokio::test]
    async fn data_calls_need_a_token() {
        let backend = InMemoryBackend::new();
        let err = backend
            .list_routines(&AccessToken::new("forged"))
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn commit_is_single_shot() {
        let backend = InMemoryBackend::new();
        let user = backend.add_account("a@b.c", "pw", "A", "Repayment", Role::Operator);
        let token = backend.issue_token(user);
        backend.add_task(TaskInstance::pending(
            "1",
            "R",
            "Repayment",
            at("2026-10-19T09:00:00Z"),
        ));

        let locked = at("2026-10-19T09:05:00Z");
        backend.commit_lock(&token, &commit("1", user, locked)).await.unwrap();
        let err = backend
            .commit_lock(&token, &commit("1", user, locked))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));

        let task = backend.task(&TaskId::new("1")).unwrap();
        assert!(task.is_locked());
        assert_eq!(task.locked_time, Some(locked));
        assert_eq!(backend.audit_records().len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_changes_nothing() {
        let backend = InMemoryBackend::new();
        let user = backend.add_account("a@b.c", "pw", "A", "Repayment", Role::Operator);
        let token = backend.issue_token(user);
        backend.add_task(TaskInstance::pending(
            "1",
            "R",
            "Repayment",
            at("2026-10-19T09:00:00Z"),
        ));
        backend.set_fail_commits(true);

        assert!(backend
            .commit_lock(&token, &commit("1", user, at("2026-10-19T09:05:00Z")))
            .await
            .is_err());
        assert!(!backend.task(&TaskId::new("1")).unwrap().is_locked());
        assert!(backend.audit_records().is_empty());
    }

    #[tokio::test]
    async fn audit_is_newest_first_and_bounded() {
        let backend = InMemoryBackend::new();
        let user = backend.add_account("a@b.c", "pw", "A", "Repayment", Role::Operator);
        let token = backend.issue_token(user);
        for (id, minute) in [("1", 1), ("2", 2), ("3", 3)] {
            backend.add_task(TaskInstance::pending(
                id,
                "R",
                "Repayment",
                at("2026-10-19T09:00:00Z"),
            ));
            backend
                .commit_lock(
                    &token,
                    &commit(id, user, at("2026-10-19T09:00:00Z") + Duration::minutes(minute)),
                )
                .await
                .unwrap();
        }

        let records = backend.list_audit(&token, 2).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, ["3", "2"]);
    }

    #[test]
    fn demo_data_is_scheduled_today() {
        let now = at("2026-10-19T10:30:00Z");
        let backend = InMemoryBackend::with_demo_data(now);
        let (from, until) = utc_day(now);
        let tasks = backend.state.read().tasks.clone();
        assert!(!tasks.is_empty());
        assert!(tasks
            .iter()
            .all(|t| t.scheduled_time >= from && t.scheduled_time < until));
        assert_eq!(backend.departments().len(), 3);
        assert_eq!(backend.routines().len(), 3);
    }
}
