//! REST implementation of [`Backend`]
//!
//! Speaks the hosted service's two HTTP surfaces:
//! - auth (`/auth/v1/...`) for sign-in, refresh, sign-up, sign-out and identity
//! - PostgREST (`/rest/v1/<table>`) for rows, with `eq.`/`gte.`/`lt.` filters
//!
//! Every request carries the `apikey` header plus a bearer token: the user's
//! access token when there is one, the anon key otherwise.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use opsflow_core::{
    AccessToken, AppConfig, AuditDetails, AuditRecord, AuthSession, Backend, BackendError,
    Department, DepartmentId, Evidence, Identity, LockCommit, NewDepartment, NewRoutine,
    RefreshToken, Role, Routine, RoutineId, SignUp, TaskId, TaskInstance, TaskQuery, UserId, UserProfile,
};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

const USERS: &str = "users";
const DEPARTMENTS: &str = "departments";
const ROUTINES: &str = "routines";
const TASKS: &str = "task_instances";
const AUDIT: &str = "audit_ledger";

/// Database function that applies a lock and appends its audit row
pub const LOCK_TASK_RPC: &str = "lock_task";

trait WithAuth {
    fn with_auth(self, anon_key: &str, token: Option<&AccessToken>) -> Self;
}

impl WithAuth for RequestBuilder {
    fn with_auth(self, anon_key: &str, token: Option<&AccessToken>) -> Self {
        let bearer = token.map_or(anon_key, AccessToken::expose);
        self.header("apikey", anon_key).bearer_auth(bearer)
    }
}

/// Arguments of the `lock_task` database function
#[derive(Debug, Serialize)]
struct LockTaskParams<'a> {
    p_task_id: &'a TaskId,
    p_commentary: &'a str,
    p_evidence: &'a Evidence,
    p_operator: UserId,
    p_locked_time: DateTime<Utc>,
    p_tat_actual_minutes: i64,
    p_tat_breached: bool,
    p_actor_role: Role,
    p_details: AuditDetails,
}

impl<'a> From<&'a LockCommit> for LockTaskParams<'a> {
    fn from(commit: &'a LockCommit) -> Self {
        Self {
            p_task_id: &commit.task_id,
            p_commentary: &commit.update.commentary,
            p_evidence: &commit.update.evidence,
            p_operator: commit.update.assigned_operator,
            p_locked_time: commit.update.locked_time,
            p_tat_actual_minutes: commit.update.tat_actual_minutes,
            p_tat_breached: commit.update.tat_breached,
            p_actor_role: commit.audit.actor_role,
            p_details: commit.audit.details,
        }
    }
}

/// Client for the hosted backend. Build once and share.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl RestBackend {
    /// Build a client from configuration
    ///
    /// # Errors
    /// `BackendError::Transport` if the HTTP client cannot be constructed
    pub fn new(config: &AppConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("opsflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;
        Ok(Self::with_client(client, &config.backend_url, &config.anon_key))
    }

    /// Wrap an existing `reqwest` client
    #[must_use]
    pub fn with_client(client: Client, base_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    /// Base URL without trailing slash
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth(&self, method: Method, path: &str, token: Option<&AccessToken>) -> RequestBuilder {
        self.client
            .request(method, format!("{}/auth/v1/{path}", self.base_url))
            .with_auth(&self.anon_key, token)
    }

    fn rest(&self, method: Method, table: &str, token: &AccessToken) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .with_auth(&self.anon_key, Some(token))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        token: &AccessToken,
        table: &'static str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, BackendError> {
        tracing::debug!(table, ?query, "select");
        let response = send(
            self.rest(Method::GET, table, token)
                .query(&[("select", "*")])
                .query(query),
        )
        .await?;
        decode_rows(response, table).await
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        token: &AccessToken,
        table: &'static str,
        id: &str,
    ) -> Result<Option<T>, BackendError> {
        let rows = self
            .select(
                token,
                table,
                &[("id", format!("eq.{id}")), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert<T: Serialize + Sync>(
        &self,
        token: &AccessToken,
        table: &'static str,
        row: &T,
    ) -> Result<(), BackendError> {
        tracing::debug!(table, "insert");
        send(
            self.rest(Method::POST, table, token)
                .header("Prefer", "return=minimal")
                .json(row),
        )
        .await?;
        Ok(())
    }

    async fn delete(
        &self,
        token: &AccessToken,
        table: &'static str,
        id: &str,
    ) -> Result<(), BackendError> {
        tracing::debug!(table, id, "delete");
        send(
            self.rest(Method::DELETE, table, token)
                .query(&[("id", format!("eq.{id}"))]),
        )
        .await?;
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn send(request: RequestBuilder) -> Result<Response, BackendError> {
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let err = status_error(status.as_u16(), &body);
    tracing::debug!(status = status.as_u16(), error = %err, "backend refused request");
    Err(err)
}

fn status_error(status: u16, body: &str) -> BackendError {
    let message = error_message(body);
    match status {
        401 | 403 => BackendError::Unauthenticated(message),
        409 => BackendError::Conflict(message),
        _ => BackendError::Status { status, message },
    }
}

/// Human-readable part of an auth or PostgREST error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

async fn decode_rows<T: DeserializeOwned>(
    response: Response,
    table: &'static str,
) -> Result<Vec<T>, BackendError> {
    let bytes = response.bytes().await.map_err(transport)?;
    let malformed = |e: serde_json::Error| BackendError::MalformedRow {
        table,
        reason: e.to_string(),
    };
    let rows: Vec<Value> = serde_json::from_slice(&bytes).map_err(malformed)?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(malformed))
        .collect()
}

async fn decode<T: DeserializeOwned>(response: Response, what: &'static str) -> Result<T, BackendError> {
    let bytes = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::MalformedRow {
        table: what,
        reason: e.to_string(),
    })
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError> {
        let response = send(
            self.auth(Method::POST, "token", None)
                .query(&[("grant_type", "password")])
                .json(&json!({ "email": email, "password": password })),
        )
        .await?;
        decode(response, "session").await
    }

    async fn refresh_session(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<AuthSession, BackendError> {
        let response = send(
            self.auth(Method::POST, "token", None)
                .query(&[("grant_type", "refresh_token")])
                .json(&json!({ "refresh_token": refresh_token.expose() })),
        )
        .await?;
        decode(response, "session").await
    }

    async fn sign_up(&self, request: &SignUp) -> Result<(), BackendError> {
        send(self.auth(Method::POST, "signup", None).json(&json!({
            "email": request.email,
            "password": request.password,
            "data": {
                "full_name": request.full_name,
                "department": request.department,
            },
        })))
        .await?;
        Ok(())
    }

    async fn sign_out(&self, token: &AccessToken) -> Result<(), BackendError> {
        send(self.auth(Method::POST, "logout", Some(token))).await?;
        Ok(())
    }

    async fn current_user(&self, token: &AccessToken) -> Result<Option<Identity>, BackendError> {
        let response = send(self.auth(Method::GET, "user", Some(token))).await?;
        decode(response, "identity").await.map(Some)
    }

    async fn fetch_profile(
        &self,
        token: &AccessToken,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, BackendError> {
        self.select_one(token, USERS, &user_id.to_string()).await
    }

    async fn list_tasks(
        &self,
        token: &AccessToken,
        query: &TaskQuery,
    ) -> Result<Vec<TaskInstance>, BackendError> {
        self.select(
            token,
            TASKS,
            &[
                ("department", format!("eq.{}", query.department)),
                ("scheduled_time", format!("gte.{}", timestamp(query.from))),
                ("scheduled_time", format!("lt.{}", timestamp(query.until))),
                ("order", "scheduled_time.asc".to_string()),
            ],
        )
        .await
    }

    async fn fetch_task(
        &self,
        token: &AccessToken,
        task_id: &TaskId,
    ) -> Result<Option<TaskInstance>, BackendError> {
        self.select_one(token, TASKS, task_id.as_str()).await
    }

    async fn fetch_routine(
        &self,
        token: &AccessToken,
        routine_id: &RoutineId,
    ) -> Result<Option<Routine>, BackendError> {
        self.select_one(token, ROUTINES, routine_id.as_str()).await
    }

    async fn commit_lock(
        &self,
        token: &AccessToken,
        commit: &LockCommit,
    ) -> Result<(), BackendError> {
        tracing::debug!(task = %commit.task_id, "rpc {LOCK_TASK_RPC}");
        send(
            self.rest(Method::POST, &format!("rpc/{LOCK_TASK_RPC}"), token)
                .json(&LockTaskParams::from(commit)),
        )
        .await?;
        Ok(())
    }

    async fn list_routines(&self, token: &AccessToken) -> Result<Vec<Routine>, BackendError> {
        self.select(token, ROUTINES, &[("order", "id.asc".to_string())])
            .await
    }

    async fn list_departments(&self, token: &AccessToken) -> Result<Vec<Department>, BackendError> {
        self.select(token, DEPARTMENTS, &[("order", "name.asc".to_string())])
            .await
    }

    async fn insert_routine(
        &self,
        token: &AccessToken,
        routine: &NewRoutine,
    ) -> Result<(), BackendError> {
        self.insert(token, ROUTINES, routine).await
    }

    async fn insert_department(
        &self,
        token: &AccessToken,
        department: &NewDepartment,
    ) -> Result<(), BackendError> {
        self.insert(token, DEPARTMENTS, department).await
    }

    async fn delete_routine(
        &self,
        token: &AccessToken,
        routine_id: &RoutineId,
    ) -> Result<(), BackendError> {
        self.delete(token, ROUTINES, routine_id.as_str()).await
    }

    async fn delete_department(
        &self,
        token: &AccessToken,
        department_id: &DepartmentId,
    ) -> Result<(), BackendError> {
        self.delete(token, DEPARTMENTS, department_id.as_str()).await
    }

    async fn list_audit(
        &self,
        token: &AccessToken,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, BackendError> {
        self.select(
            token,
            AUDIT,
            &[
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}
