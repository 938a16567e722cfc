//! Admin reference-data editor
//!
//! Create/delete over `routines` and `departments`. Forms arrive as raw
//! strings from the browser; blanks fall back to defaults:
//!
//! | Field | Default |
//! |---|---|
//! | routine `frequency` | `Daily` |
//! | routine `repeat_interval_minutes` | 60 |
//! | routine `start_time` / `end_time` | 08:00 / 17:00 |
//! | routine `tat_minutes` | 45 |
//! | department hours | 08:00 to 17:00 |
//!
//! Deletes are permanent and unchecked against references.

use crate::backend::Backend;
use crate::error::AdminError;
use crate::types::{
    AccessToken, ClockTime, Department, DepartmentId, Frequency, NewDepartment, NewRoutine,
    Routine, RoutineId, UserProfile,
};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

/// Default routine repeat interval
pub const DEFAULT_REPEAT_INTERVAL_MINUTES: i64 = 60;
/// Default routine TAT threshold
pub const DEFAULT_TAT_MINUTES: i64 = 45;

fn default_start() -> ClockTime {
    ClockTime::from_hm(8, 0).unwrap_or_else(|| unreachable!("08:00 is a valid time"))
}

fn default_end() -> ClockTime {
    ClockTime::from_hm(17, 0).unwrap_or_else(|| unreachable!("17:00 is a valid time"))
}

/// New-routine form
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutineForm {
    /// Routine code
    pub id: String,
    /// Name
    pub name: String,
    /// Owning department id
    pub department_id: String,
    /// `Daily` or `Weekdays`
    pub frequency: String,
    /// Minutes between repeats
    pub repeat_interval_minutes: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    /// TAT threshold
    pub tat_minutes: String,
    /// Free text
    pub description: String,
}

impl RoutineForm {
    /// Validate and fill defaults
    pub fn validate(&self, created_by: &UserProfile) -> Result<NewRoutine, AdminError> {
        let id = self.id.trim();
        let name = self.name.trim();
        let department_id = self.department_id.trim();
        if id.is_empty() || name.is_empty() || department_id.is_empty() {
            return Err(AdminError::MissingRoutineFields);
        }

        let frequency = match self.frequency.trim() {
            "" => Frequency::default(),
            raw => Frequency::from_str(raw).map_err(|value| AdminError::InvalidField {
                field: "frequency",
                value,
            })?,
        };

        Ok(NewRoutine {
            id: RoutineId::new(id),
            name: name.to_string(),
            department_id: DepartmentId::new(department_id),
            frequency,
            repeat_interval_minutes: minutes_or(
                "repeat_interval_minutes",
                &self.repeat_interval_minutes,
                DEFAULT_REPEAT_INTERVAL_MINUTES,
            )?,
            start_time: time_or("start_time", &self.start_time, default_start())?,
            end_time: time_or("end_time", &self.end_time, default_end())?,
            tat_minutes: minutes_or("tat_minutes", &self.tat_minutes, DEFAULT_TAT_MINUTES)?,
            description: self.description.trim().to_string(),
            created_by: created_by.id,
            is_active: true,
        })
    }
}

/// New-department form
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DepartmentForm {
    /// Name
    pub name: String,
    /// Free text
    pub description: String,
    /// `HH:MM`
    pub operating_hours_start: String,
    /// `HH:MM`
    pub operating_hours_end: String,
}

impl DepartmentForm {
    /// Validate and fill defaults
    pub fn validate(&self) -> Result<NewDepartment, AdminError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AdminError::MissingDepartmentName);
        }
        Ok(NewDepartment {
            name: name.to_string(),
            description: self.description.trim().to_string(),
            operating_hours_start: time_or(
                "operating_hours_start",
                &self.operating_hours_start,
                default_start(),
            )?,
            operating_hours_end: time_or(
                "operating_hours_end",
                &self.operating_hours_end,
                default_end(),
            )?,
        })
    }
}

/// Delete form: the id plus the confirmation checkbox
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeleteForm {
    /// Row id
    pub id: String,
    /// Present when the admin confirmed
    pub confirm: Option<String>,
}

impl DeleteForm {
    /// Check if the deletion was confirmed
    #[must_use]
    pub fn confirmed(&self) -> bool {
        self.confirm
            .as_deref()
            .is_some_and(|v| matches!(v, "yes" | "on" | "true"))
    }
}

fn minutes_or(field: &'static str, raw: &str, default: i64) -> Result<i64, AdminError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    match raw.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(AdminError::InvalidField {
            field,
            value: raw.to_string(),
        }),
    }
}

fn time_or(field: &'static str, raw: &str, default: ClockTime) -> Result<ClockTime, AdminError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    ClockTime::parse(raw).ok_or_else(|| AdminError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Reference-data editor
#[derive(Clone)]
pub struct AdminEditor {
    backend: Arc<dyn Backend>,
}

impl AdminEditor {
    /// Create new editor
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Refuse roles that may not edit reference data
    pub fn authorize(&self, profile: &UserProfile) -> Result<(), AdminError> {
        if profile.role.can_administer() {
            Ok(())
        } else {
            tracing::warn!(user = %profile.id, role = %profile.role, "admin access refused");
            Err(AdminError::Forbidden(profile.role))
        }
    }

    /// Routines ordered by id
    pub async fn list_routines(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
    ) -> Result<Vec<Routine>, AdminError> {
        self.authorize(profile)?;
        let mut routines = self.backend.list_routines(token).await?;
        routines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(routines)
    }

    /// Departments ordered by name
    pub async fn list_departments(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
    ) -> Result<Vec<Department>, AdminError> {
        self.authorize(profile)?;
        let mut departments = self.backend.list_departments(token).await?;
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(departments)
    }

    /// Validate and insert a routine
    pub async fn create_routine(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
        form: &RoutineForm,
    ) -> Result<NewRoutine, AdminError> {
        self.authorize(profile)?;
        let routine = form.validate(profile)?;
        self.backend.insert_routine(token, &routine).await?;
        tracing::info!(routine = %routine.id, admin = %profile.id, "routine created");
        Ok(routine)
    }

    /// Validate and insert a department
    pub async fn create_department(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
        form: &DepartmentForm,
    ) -> Result<NewDepartment, AdminError> {
        self.authorize(profile)?;
        let department = form.validate()?;
        self.backend.insert_department(token, &department).await?;
        tracing::info!(department = %department.name, admin = %profile.id, "department created");
        Ok(department)
    }

    /// Permanently delete a routine
    pub async fn delete_routine(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
        form: &DeleteForm,
    ) -> Result<RoutineId, AdminError> {
        self.authorize(profile)?;
        let id = confirmed_id(form)?;
        let id = RoutineId::new(id);
        self.backend.delete_routine(token, &id).await?;
        tracing::info!(routine = %id, admin = %profile.id, "routine deleted");
        Ok(id)
    }

    /// Permanently delete a department
    pub async fn delete_department(
        &self,
        token: &AccessToken,
        profile: &UserProfile,
        form: &DeleteForm,
    ) -> Result<DepartmentId, AdminError> {
        self.authorize(profile)?;
        let id = confirmed_id(form)?;
        let id = DepartmentId::new(id);
        self.backend.delete_department(token, &id).await?;
        tracing::info!(department = %id, admin = %profile.id, "department deleted");
        Ok(id)
    }
}

fn confirmed_id(form: &DeleteForm) -> Result<&str, AdminError> {
    if !form.confirmed() {
        return Err(AdminError::NotConfirmed);
    }
    let id = form.id.trim();
    if id.is_empty() {
        return Err(AdminError::InvalidField {
            field: "id",
            value: form.id.clone(),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::error::BackendError;
    use crate::types::{Role, UserId};
    use pretty_assertions::assert_eq;

    fn admin() -> UserProfile {
        UserProfile {
            id: UserId::new(),
            email: None,
            full_name: Some("Admin".into()),
            department: "Operational Excellence".into(),
            role: Role::Admin,
        }
    }

    fn routine_form() -> RoutineForm {
        RoutineForm {
            id: "OPS-CASH-001".into(),
            name: "Cash reconciliation".into(),
            department_id: "1".into(),
            ..RoutineForm::default()
        }
    }

    #[test]
    fn routine_defaults_fill_blank_fields() {
        let profile = admin();
        let routine = routine_form().validate(&profile).unwrap();
        assert_eq!(routine.frequency, Frequency::Daily);
        assert_eq!(routine.repeat_interval_minutes, 60);
        assert_eq!(routine.start_time, ClockTime::from_hm(8, 0).unwrap());
        assert_eq!(routine.end_time, ClockTime::from_hm(17, 0).unwrap());
        assert_eq!(routine.tat_minutes, 45);
        assert_eq!(routine.created_by, profile.id);
        assert!(routine.is_active);
    }

    #[test]
    fn routine_requires_id_name_department() {
        for form in [
            RoutineForm { id: " ".into(), ..routine_form() },
            RoutineForm { name: String::new(), ..routine_form() },
            RoutineForm { department_id: String::new(), ..routine_form() },
        ] {
            assert!(matches!(
                form.validate(&admin()),
                Err(AdminError::MissingRoutineFields)
            ));
        }
    }

    #[test]
    fn routine_rejects_unparseable_values() {
        let form = RoutineForm {
            tat_minutes: "soon".into(),
            ..routine_form()
        };
        assert!(matches!(
            form.validate(&admin()),
            Err(AdminError::InvalidField { field: "tat_minutes", .. })
        ));
        let form = RoutineForm {
            frequency: "Hourly".into(),
            ..routine_form()
        };
        assert!(matches!(
            form.validate(&admin()),
            Err(AdminError::InvalidField { field: "frequency", .. })
        ));
    }

    #[test]
    fn department_requires_name() {
        assert!(matches!(
            DepartmentForm::default().validate(),
            Err(AdminError::MissingDepartmentName)
        ));
        let dept = DepartmentForm {
            name: "Treasury".into(),
            operating_hours_start: "09:30".into(),
            ..DepartmentForm::default()
        }
        .validate()
        .unwrap();
        assert_eq!(dept.operating_hours_start, ClockTime::from_hm(9, 30).unwrap());
        assert_eq!(dept.operating_hours_end, ClockTime::from_hm(17, 0).unwrap());
    }

    #[tokio::test]
    async fn operators_are_forbidden() {
        let mut mock = MockBackend::new();
        mock.expect_list_routines().times(0);
        mock.expect_insert_routine().times(0);
        let editor = AdminEditor::new(Arc::new(mock));
        let operator = UserProfile {
            role: Role::Operator,
            ..admin()
        };
        let token = AccessToken::new("t");

        assert!(matches!(
            editor.list_routines(&token, &operator).await,
            Err(AdminError::Forbidden(Role::Operator))
        ));
        assert!(matches!(
            editor.create_routine(&token, &operator, &routine_form()).await,
            Err(AdminError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let mut mock = MockBackend::new();
        mock.expect_delete_routine().times(0);
        mock.expect_delete_department()
            .times(1)
            .withf(|_, id| id.as_str() == "4")
            .returning(|_, _| Ok(()));
        let editor = AdminEditor::new(Arc::new(mock));
        let token = AccessToken::new("t");

        let unconfirmed = DeleteForm {
            id: "OPS-CASH-001".into(),
            confirm: None,
        };
        assert!(matches!(
            editor.delete_routine(&token, &admin(), &unconfirmed).await,
            Err(AdminError::NotConfirmed)
        ));

        let confirmed = DeleteForm {
            id: "4".into(),
            confirm: Some("yes".into()),
        };
        let id = editor
            .delete_department(&token, &admin(), &confirmed)
            .await
            .unwrap();
        assert_eq!(id, DepartmentId::new("4"));
    }

    #[tokio::test]
    async fn listings_are_sorted() {
        let mut mock = MockBackend::new();
        mock.expect_list_departments().returning(|_| {
            Ok(vec![
                Department {
                    id: DepartmentId::new("2"),
                    name: "Repayment".into(),
                    description: None,
                    operating_hours_start: None,
                    operating_hours_end: None,
                },
                Department {
                    id: DepartmentId::new("1"),
                    name: "Disbursement".into(),
                    description: None,
                    operating_hours_start: None,
                    operating_hours_end: None,
                },
            ])
        });
        let editor = AdminEditor::new(Arc::new(mock));
        let names: Vec<_> = editor
            .list_departments(&AccessToken::new("t"), &admin())
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["Disbursement", "Repayment"]);
    }

    #[tokio::test]
    async fn backend_failure_is_generic_to_the_user() {
        let mut mock = MockBackend::new();
        mock.expect_insert_department()
            .returning(|_, _| Err(BackendError::Status { status: 409, message: "duplicate key".into() }));
        let editor = AdminEditor::new(Arc::new(mock));
        let err = editor
            .create_department(
                &AccessToken::new("t"),
                &admin(),
                &DepartmentForm {
                    name: "Repayment".into(),
                    ..DepartmentForm::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message("Failed to create department"),
            "Failed to create department"
        );
    }
}
