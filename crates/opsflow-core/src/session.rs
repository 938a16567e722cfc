//! Session gate
//!
//! Every protected page resolves the caller before rendering:
//! token -> identity (auth service) -> profile row (`users`).
//! Any missing link fails closed. A rejected access token gets one retry
//! after a refresh grant when the caller holds a refresh token.

use crate::backend::Backend;
use crate::error::SessionError;
use crate::types::{AccessToken, AuthSession, Identity, RefreshToken, UserProfile};
use std::sync::Arc;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    /// Identity from the auth service
    pub identity: Identity,
    /// Profile row
    pub profile: UserProfile,
}

/// Caller resolved by [`SessionGate::resolve_with_refresh`]
#[derive(Debug)]
pub struct Resolved {
    /// Authenticated caller
    pub operator: Operator,
    /// New tokens when the old access token had to be refreshed
    pub renewed: Option<AuthSession>,
}

/// Resolves tokens to operators
#[derive(Clone)]
pub struct SessionGate {
    backend: Arc<dyn Backend>,
}

impl SessionGate {
    /// Create new gate
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Resolve the caller behind `token`
    ///
    /// # Errors
    /// - `SessionError::NoSession` when there is no token
    /// - `SessionError::Identity` when the auth service rejects it
    /// - `SessionError::ProfileUnavailable` when the profile row is missing
    ///   or cannot be read
    pub async fn resolve(&self, token: Option<&AccessToken>) -> Result<Operator, SessionError> {
        let token = token.ok_or(SessionError::NoSession)?;

        let identity = match self.backend.current_user(token).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return Err(SessionError::NoSession),
            Err(e) => {
                tracing::debug!(error = %e, "identity lookup failed");
                return Err(SessionError::Identity(e));
            }
        };

        match self.backend.fetch_profile(token, identity.id).await {
            Ok(Some(profile)) => Ok(Operator { identity, profile }),
            Ok(None) => {
                tracing::warn!(user = %identity.id, "authenticated user has no profile row");
                Err(SessionError::ProfileUnavailable {
                    user_id: identity.id,
                    reason: "no profile row".to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(user = %identity.id, error = %e, "profile fetch failed");
                Err(SessionError::ProfileUnavailable {
                    user_id: identity.id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Resolve the caller, refreshing the session once if the access token
    /// was rejected.
    ///
    /// # Errors
    /// Same as [`SessionGate::resolve`]. A failed refresh grant is reported
    /// as `SessionError::Identity`.
    pub async fn resolve_with_refresh(
        &self,
        token: Option<&AccessToken>,
        refresh_token: Option<&RefreshToken>,
    ) -> Result<Resolved, SessionError> {
        let err = match self.resolve(token).await {
            Ok(operator) => {
                return Ok(Resolved {
                    operator,
                    renewed: None,
                })
            }
            Err(e) => e,
        };
        let refresh_token = match refresh_token {
            Some(refresh_token) if token.is_some() && err.is_token_rejected() => refresh_token,
            _ => return Err(err),
        };

        let session = self
            .backend
            .refresh_session(refresh_token)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "session refresh failed");
                SessionError::Identity(e)
            })?;
        tracing::debug!(user = %session.user.id, "session refreshed");

        let operator = self.resolve(Some(&session.access_token)).await?;
        Ok(Resolved {
            operator,
            renewed: Some(session),
        })
    }
}
