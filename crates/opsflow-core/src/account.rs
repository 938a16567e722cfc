//! Login, registration and logout against the auth service

use crate::backend::Backend;
use crate::error::AccountError;
use crate::types::{AccessToken, AuthSession, SignUp};
use serde::Deserialize;
use std::sync::Arc;

/// Login form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    /// Email
    #[serde(default)]
    pub email: String,
    /// Password
    #[serde(default)]
    pub password: String,
}

/// Registration form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    /// Display name
    #[serde(default)]
    pub full_name: String,
    /// Email
    #[serde(default)]
    pub email: String,
    /// Password
    #[serde(default)]
    pub password: String,
    /// Department name
    #[serde(default)]
    pub department: String,
}

impl RegisterForm {
    /// Validate into a sign-up request
    pub fn validate(&self, departments: &[String]) -> Result<SignUp, AccountError> {
        let full_name = required("full name", &self.full_name)?;
        let email = required("email", &self.email)?;
        if self.password.is_empty() {
            return Err(AccountError::MissingField("password"));
        }
        let department = required("department", &self.department)?;
        if !departments.iter().any(|d| d == department) {
            return Err(AccountError::UnknownDepartment(department.to_string()));
        }
        Ok(SignUp {
            email: email.to_string(),
            password: self.password.clone(),
            full_name: full_name.to_string(),
            department: department.to_string(),
        })
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AccountError> {
    let value = value.trim();
    if value.is_empty() {
        Err(AccountError::MissingField(field))
    } else {
        Ok(value)
    }
}

/// Account operations
#[derive(Clone)]
pub struct Accounts {
    backend: Arc<dyn Backend>,
    departments: Vec<String>,
}

impl Accounts {
    /// Create new account service
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, departments: Vec<String>) -> Self {
        Self {
            backend,
            departments,
        }
    }

    /// Departments offered at registration
    #[inline]
    #[must_use]
    pub fn departments(&self) -> &[String] {
        &self.departments
    }

    /// Password sign-in
    pub async fn login(&self, form: &LoginForm) -> Result<AuthSession, AccountError> {
        let email = required("email", &form.email)?;
        if form.password.is_empty() {
            return Err(AccountError::MissingField("password"));
        }
        let session = self.backend.sign_in(email, &form.password).await?;
        tracing::info!(user = %session.user.id, "signed in");
        Ok(session)
    }

    /// Create an account
    pub async fn register(&self, form: &RegisterForm) -> Result<(), AccountError> {
        let request = form.validate(&self.departments)?;
        self.backend.sign_up(&request).await?;
        tracing::info!(email = %request.email, department = %request.department, "account registered");
        Ok(())
    }

    /// Sign out; failures are logged and otherwise ignored
    pub async fn logout(&self, token: &AccessToken) {
        if let Err(e) = self.backend.sign_out(token).await {
            tracing::warn!(error = %e, "sign-out failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::error::BackendError;

    fn departments() -> Vec<String> {
        vec!["Disbursement".into(), "Repayment".into()]
    }

    fn form() -> RegisterForm {
        RegisterForm {
            full_name: "Jane Doe".into(),
            email: " jane@example.com ".into(),
            password: "hunter22".into(),
            department: "Repayment".into(),
        }
    }

    #[test]
    fn register_form_trims_and_checks_department() {
        let signup = form().validate(&departments()).unwrap();
        assert_eq!(signup.email, "jane@example.com");
        assert_eq!(signup.department, "Repayment");

        let bad = RegisterForm {
            department: "Treasury".into(),
            ..form()
        };
        assert!(matches!(
            bad.validate(&departments()),
            Err(AccountError::UnknownDepartment(_))
        ));
    }

    #[test]
    fn register_form_requires_every_field() {
        let blank_name = RegisterForm {
            full_name: "  ".into(),
            ..form()
        };
        assert!(matches!(
            blank_name.validate(&departments()),
            Err(AccountError::MissingField("full name"))
        ));
        let no_password = RegisterForm {
            password: String::new(),
            ..form()
        };
        assert!(matches!(
            no_password.validate(&departments()),
            Err(AccountError::MissingField("password"))
        ));
    }

    #[tokio::test]
    async fn login_requires_credentials_before_calling_backend() {
        let mut mock = MockBackend::new();
        mock.expect_sign_in().times(0);
        let accounts = Accounts::new(Arc::new(mock), departments());

        let err = accounts.login(&LoginForm::default()).await.unwrap_err();
        assert!(matches!(err, AccountError::MissingField("email")));
    }

    #[tokio::test]
    async fn login_surfaces_backend_message() {
        let mut mock = MockBackend::new();
        mock.expect_sign_in().returning(|_, _| {
            Err(BackendError::Status {
                status: 400,
                message: "Invalid login credentials".into(),
            })
        });
        let accounts = Accounts::new(Arc::new(mock), departments());

        let err = accounts
            .login(&LoginForm {
                email: "a@b.c".into(),
                password: "x".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.user_message("Login failed"), "Invalid login credentials");
    }

    #[tokio::test]
    async fn logout_swallows_backend_errors() {
        let mut mock = MockBackend::new();
        mock.expect_sign_out()
            .times(1)
            .returning(|_| Err(BackendError::Transport("offline".into())));
        let accounts = Accounts::new(Arc::new(mock), departments());
        accounts.logout(&AccessToken::new("t")).await;
    }
}
