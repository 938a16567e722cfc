//! Task list loader
//!
//! The shift hub shows the caller's department for the current UTC calendar
//! day. Scoping is enforced here as well as by the backend filter, so a task
//! from another department is never handed to the lock path.

use crate::backend::{Backend, TaskQuery};
use crate::clock::Clock;
use crate::error::BackendError;
use crate::types::{AccessToken, TaskId, TaskInstance, UserProfile};
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::sync::Arc;

/// `[00:00:00Z, next day 00:00:00Z)` around `now`
#[must_use]
pub fn utc_day(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = now.date_naive();
    let start = day.and_time(NaiveTime::MIN).and_utc();
    let end = day
        .checked_add_days(Days::new(1))
        .map_or(DateTime::<Utc>::MAX_UTC, |next| next.and_time(NaiveTime::MIN).and_utc());
    (start, end)
}

/// Loads the task board for an operator
#[derive(Clone)]
pub struct TaskBoard {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
}

impl TaskBoard {
    /// Create new task board
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Query for today's tasks in `department`
    #[must_use]
    pub fn today_query(&self, department: &str) -> TaskQuery {
        let (from, until) = utc_day(self.clock.now());
        TaskQuery {
            department: department.to_string(),
            from,
            until,
        }
    }

    /// Today's tasks for the operator's department, earliest first
    pub async fn load_today(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
    ) -> Result<Vec<TaskInstance>, BackendError> {
        let query = self.today_query(&profile.department);
        let mut tasks = self.backend.list_tasks(token, &query).await?;
        let fetched = tasks.len();
        tasks.retain(|task| query.matches(task));
        if tasks.len() != fetched {
            tracing::warn!(
                department = %query.department,
                dropped = fetched - tasks.len(),
                "backend returned tasks outside the requested scope"
            );
        }
        tasks.sort_by_key(|task| task.scheduled_time);
        tracing::debug!(department = %query.department, count = tasks.len(), "task board loaded");
        Ok(tasks)
    }

    /// Fresh copy of one task, if it belongs to the operator's department
    pub async fn find(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
        task_id: &TaskId,
    ) -> Result<Option<TaskInstance>, BackendError> {
        let task = self.backend.fetch_task(token, task_id).await?;
        Ok(task.filter(|task| task.department == profile.department))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::clock::FixedClock;
    use crate::types::{Role, UserId};

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().unwrap()
    }

    fn profile(department: &str) -> UserProfile {
        UserProfile {
            id: UserId::new(),
            email: None,
            full_name: None,
            department: department.into(),
            role: Role::Operator,
        }
    }

    #[test]
    fn day_window_is_half_open() {
        let (from, until) = utc_day(at("2026-10-19T13:45:12Z"));
        assert_eq!(from, at("2026-10-19T00:00:00Z"));
        assert_eq!(until, at("2026-10-20T00:00:00Z"));

        let (from, _) = utc_day(at("2026-10-19T00:00:00Z"));
        assert_eq!(from, at("2026-10-19T00:00:00Z"));
    }

    #[tokio::test]
    async fn load_today_filters_and_orders() {
        let mut mock = MockBackend::new();
        mock.expect_list_tasks()
            .withf(|_, q| {
                q.department == "Repayment"
                    && q.from == at("2026-10-19T00:00:00Z")
                    && q.until == at("2026-10-20T00:00:00Z")
            })
            .returning(|_, _| {
                Ok(vec![
                    TaskInstance::pending("3", "R", "Repayment", at("2026-10-19T11:00:00Z")),
                    TaskInstance::pending("1", "R", "Repayment", at("2026-10-19T08:00:00Z")),
                    TaskInstance::pending("9", "R", "Disbursement", at("2026-10-19T09:00:00Z")),
                    TaskInstance::pending("7", "R", "Repayment", at("2026-10-20T00:00:00Z")),
                ])
            });

        let board = TaskBoard::new(
            Arc::new(mock),
            Arc::new(FixedClock::new(at("2026-10-19T10:00:00Z"))),
        );
        let tasks = board
            .load_today(&AccessToken::new("t"), &profile("Repayment"))
            .await
            .unwrap();

        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
    }

    #[tokio::test]
    async fn find_hides_other_departments() {
        let mut mock = MockBackend::new();
        mock.expect_fetch_task().returning(|_, id| {
            Ok(Some(TaskInstance::pending(
                id.as_str(),
                "R",
                "Disbursement",
                at("2026-10-19T09:00:00Z"),
            )))
        });
        let board = TaskBoard::new(
            Arc::new(mock),
            Arc::new(FixedClock::new(at("2026-10-19T10:00:00Z"))),
        );
        let token = AccessToken::new("t");

        let own = board
            .find(&token, &profile("Disbursement"), &TaskId::new("5"))
            .await
            .unwrap();
        assert!(own.is_some());
        let other = board
            .find(&token, &profile("Repayment"), &TaskId::new("5"))
            .await
            .unwrap();
        assert!(other.is_none());
    }
}
