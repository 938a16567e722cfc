//! Testing utilities for OpsFlow workspace
//!
//! Shared fixtures: a seeded in-memory backend, a frozen clock and the
//! records the suites keep rebuilding.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use opsflow_core::{
    AccessToken, DepartmentId, FixedClock, Frequency, InMemoryBackend, Role, Routine, RoutineId,
    TaskInstance, UserId,
};
use std::sync::Arc;

pub const OPERATOR_EMAIL: &str = "op@example.com";
pub const OPERATOR_PASSWORD: &str = "operator-pw";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-pw";
pub const DEPARTMENT: &str = "Disbursement";

/// Parse an RFC 3339 instant
pub fn at(ts: &str) -> DateTime<Utc> {
    ts.parse().unwrap()
}

/// A Monday morning inside the shift
pub fn shift_morning() -> DateTime<Utc> {
    at("2026-10-19T09:00:00Z")
}

pub fn fixed_clock(now: DateTime<Utc>) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(now))
}

pub fn routine(id: &str, tat_minutes: i64) -> Routine {
    Routine {
        id: RoutineId::new(id),
        name: format!("Routine {id}"),
        department_id: DepartmentId::new("1"),
        frequency: Frequency::Daily,
        repeat_interval_minutes: Some(60),
        start_time: None,
        end_time: None,
        tat_minutes,
        description: None,
        created_by: None,
        is_active: true,
    }
}

pub fn pending_task(id: &str, routine_id: &str, scheduled: DateTime<Utc>) -> TaskInstance {
    TaskInstance::pending(id, routine_id, DEPARTMENT, scheduled)
}

/// Backend with one operator, one admin, department 1 and routine
/// `OPS-CASH-001` (45 min SLA)
pub struct Seeded {
    pub backend: Arc<InMemoryBackend>,
    pub operator: UserId,
    pub admin: UserId,
}

impl Seeded {
    pub fn new() -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let operator = backend.add_account(
            OPERATOR_EMAIL,
            OPERATOR_PASSWORD,
            "Shift Operator",
            DEPARTMENT,
            Role::Operator,
        );
        let admin = backend.add_account(
            ADMIN_EMAIL,
            ADMIN_PASSWORD,
            "Ops Admin",
            DEPARTMENT,
            Role::Admin,
        );
        backend.add_department(DEPARTMENT, None);
        backend.add_routine(routine("OPS-CASH-001", 45));
        Self {
            backend,
            operator,
            admin,
        }
    }

    pub fn operator_token(&self) -> AccessToken {
        self.backend.issue_token(self.operator)
    }

    pub fn admin_token(&self) -> AccessToken {
        self.backend.issue_token(self.admin)
    }

    /// Add a pending task for `OPS-CASH-001`
    pub fn with_task(self, id: &str, scheduled: DateTime<Utc>) -> Self {
        self.backend.add_task(pending_task(id, "OPS-CASH-001", scheduled));
        self
    }
}

impl Default for Seeded {
    fn default() -> Self {
        Self::new()
    }
}
