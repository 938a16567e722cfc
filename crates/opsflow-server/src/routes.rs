//! HTTP routes
//!
//! Every dashboard handler first runs [`authenticate`]: an unknown session
//! goes to `/login`, an expired access token is refreshed once, and a session
//! whose token or profile still does not resolve is dropped before
//! redirecting. Mutations answer with `303 See Other` back
//! to the page they came from and leave a flash message in the session.

use crate::sessions::{clear_cookie, session_cookie, Flash, InFlightLock, COOKIE_NAME};
use crate::state::AppState;
use crate::views::{self, AdminTab, ShiftHubView};
use opsflow_core::{
    AccessToken, AdminError, BackendError, DeleteForm, DepartmentForm, LockDraft, LockError,
    LockRequest, LoginForm, Operator, RegisterForm, Resolved, RoutineForm, SessionError, TaskId,
    PROFILE_UNAVAILABLE_NOTICE, SESSION_EXPIRED_NOTICE,
};
use serde::Deserialize;
use std::convert::Infallible;
use warp::filters::BoxedFilter;
use warp::http::header::{LOCATION, SET_COOKIE};
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const FORM_LIMIT: u64 = 16 * 1024;

/// All routes, wrapped in request tracing
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let root = warp::get()
        .and(warp::path::end())
        .map(|| redirect("/dashboard/shift-hub"));

    root.or(account_routes(&state))
        .unify()
        .or(shift_hub_routes(&state))
        .unify()
        .or(admin_routes(&state))
        .unify()
        .or(audit_routes(&state))
        .unify()
        .with(warp::trace::request())
}

fn with_state(state: &AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    let state = state.clone();
    warp::any().map(move || state.clone())
}

fn session_id() -> impl Filter<Extract = (Option<String>,), Error = Infallible> + Copy {
    warp::cookie::optional(COOKIE_NAME)
}

fn form<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

// -- responses ---------------------------------------------------------------

fn redirect(to: &str) -> Response {
    let mut response = StatusCode::SEE_OTHER.into_response();
    if let Ok(location) = HeaderValue::from_str(to) {
        response.headers_mut().insert(LOCATION, location);
    }
    response
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

fn html(body: String) -> Response {
    warp::reply::html(body).into_response()
}

// -- session gate ------------------------------------------------------------

/// A request whose session resolved to an operator
struct Authed {
    session_id: String,
    token: AccessToken,
    operator: Operator,
}

/// Resolve the session cookie to an operator, or the redirect to send instead
async fn authenticate(state: &AppState, session_id: Option<String>) -> Result<Authed, Response> {
    let Some(session_id) = session_id else {
        return Err(redirect("/login"));
    };
    let Some((token, refresh_token)) = state.sessions.credentials(&session_id) else {
        return Err(with_cookie(redirect("/login"), &clear_cookie()));
    };
    match state
        .gate
        .resolve_with_refresh(Some(&token), refresh_token.as_ref())
        .await
    {
        Ok(Resolved { operator, renewed }) => {
            let token = match renewed {
                Some(session) => state.sessions.renew(&session_id, session),
                None => token,
            };
            Ok(Authed {
                session_id,
                token,
                operator,
            })
        }
        Err(e) => Err(end_session(state, &session_id, &e)),
    }
}

fn end_session(state: &AppState, session_id: &str, reason: &SessionError) -> Response {
    state.sessions.remove(session_id);
    let to = match reason {
        SessionError::NoSession => "/login",
        SessionError::Identity(_) => "/login?notice=expired",
        SessionError::ProfileUnavailable { .. } => "/login?notice=profile",
    };
    with_cookie(redirect(to), &clear_cookie())
}

/// Data call rejected the token mid-session
fn expire(state: &AppState, authed: &Authed, error: BackendError) -> Response {
    tracing::info!(user = %authed.operator.profile.id, error = %error, "token rejected, ending session");
    end_session(state, &authed.session_id, &SessionError::Identity(error))
}

macro_rules! authed {
    ($state:expr, $cookie:expr) => {
        match authenticate(&$state, $cookie).await {
            Ok(authed) => authed,
            Err(response) => return Ok(response),
        }
    };
}

// -- login / register / logout ----------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    notice: Option<String>,
}

fn login_notice(code: Option<&str>) -> Option<&'static str> {
    match code? {
        "expired" => Some(SESSION_EXPIRED_NOTICE),
        "profile" => Some(PROFILE_UNAVAILABLE_NOTICE),
        "logged-out" => Some("You have been logged out."),
        _ => None,
    }
}

fn account_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let login_page = warp::get()
        .and(warp::path!("login"))
        .and(warp::query::<LoginQuery>())
        .map(|query: LoginQuery| html(views::login(login_notice(query.notice.as_deref()), None, "")));

    let login = warp::post()
        .and(warp::path!("login"))
        .and(with_state(state))
        .and(form::<LoginForm>())
        .and_then(login);

    let register_page = warp::get()
        .and(warp::path!("register"))
        .and(with_state(state))
        .map(|state: AppState| html(views::register(state.accounts.departments(), None, "")));

    let register = warp::post()
        .and(warp::path!("register"))
        .and(with_state(state))
        .and(form::<RegisterForm>())
        .and_then(register);

    let logout = warp::post()
        .and(warp::path!("logout"))
        .and(with_state(state))
        .and(session_id())
        .and_then(logout);

    login_page
        .or(login)
        .unify()
        .or(register_page)
        .unify()
        .or(register)
        .unify()
        .or(logout)
        .unify()
        .boxed()
}

async fn login(state: AppState, form: LoginForm) -> Result<Response, Infallible> {
    match state.accounts.login(&form).await {
        Ok(session) => {
            let id = state
                .sessions
                .create(session.access_token, session.refresh_token);
            Ok(with_cookie(
                redirect("/dashboard/shift-hub"),
                &session_cookie(&id, state.config.secure_cookies),
            ))
        }
        Err(e) => {
            let message = e.user_message("Login failed");
            Ok(html(views::login(None, Some(&message), &form.email)))
        }
    }
}

async fn register(state: AppState, form: RegisterForm) -> Result<Response, Infallible> {
    match state.accounts.register(&form).await {
        Ok(()) => Ok(html(views::registered())),
        Err(e) => {
            let message = e.user_message("Registration failed");
            Ok(html(views::register(
                state.accounts.departments(),
                Some(&message),
                &form.department,
            )))
        }
    }
}

async fn logout(state: AppState, session_id: Option<String>) -> Result<Response, Infallible> {
    if let Some(session) = session_id.and_then(|id| state.sessions.remove(&id)) {
        state.accounts.logout(&session.token).await;
    }
    Ok(with_cookie(redirect("/login?notice=logged-out"), &clear_cookie()))
}

// -- shift hub ---------------------------------------------------------------

const SHIFT_HUB: &str = "/dashboard/shift-hub";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectForm {
    task_id: String,
}

/// Shared draft form; every shift-hub button posts all of it
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DraftForm {
    commentary: String,
    evidence_link: String,
    index: Option<usize>,
}

fn shift_hub_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let page = warp::get()
        .and(warp::path!("dashboard" / "shift-hub"))
        .and(with_state(state))
        .and(session_id())
        .and_then(shift_hub);

    let select = warp::post()
        .and(warp::path!("dashboard" / "shift-hub" / "select"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<SelectForm>())
        .and_then(select_task);

    let commentary = warp::post()
        .and(warp::path!("dashboard" / "shift-hub" / "commentary"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DraftForm>())
        .and_then(save_commentary);

    let add_evidence = warp::post()
        .and(warp::path!("dashboard" / "shift-hub" / "evidence" / "add"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DraftForm>())
        .and_then(add_evidence);

    let remove_evidence = warp::post()
        .and(warp::path!("dashboard" / "shift-hub" / "evidence" / "remove"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DraftForm>())
        .and_then(remove_evidence);

    let lock = warp::post()
        .and(warp::path!("dashboard" / "shift-hub" / "lock"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DraftForm>())
        .and_then(lock_task);

    page.or(select)
        .unify()
        .or(commentary)
        .unify()
        .or(add_evidence)
        .unify()
        .or(remove_evidence)
        .unify()
        .or(lock)
        .unify()
        .boxed()
}

async fn shift_hub(state: AppState, session_id: Option<String>) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let profile = &authed.operator.profile;

    let (tasks, load_error) = match state.board.load_today(&authed.token, profile).await {
        Ok(tasks) => (tasks, None),
        Err(e) if e.is_auth_failure() => return Ok(expire(&state, &authed, e)),
        Err(e) => {
            tracing::warn!(department = %profile.department, error = %e, "task board load failed");
            (Vec::new(), Some(e.user_message()))
        }
    };
    let draft = state.sessions.draft(&authed.session_id).unwrap_or_default();
    let flash = state.sessions.take_flash(&authed.session_id);
    let shift = state.locks.shift();

    Ok(html(views::shift_hub(&ShiftHubView {
        profile,
        tasks: &tasks,
        draft: &draft,
        flash: flash.as_ref(),
        shift_ended_at: state.shift_ended().then_some(shift.end_hour),
        load_error,
    })))
}

async fn select_task(
    state: AppState,
    session_id: Option<String>,
    form: SelectForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let task_id = form.task_id.trim();
    if !task_id.is_empty() {
        let task_id = TaskId::new(task_id);
        state
            .sessions
            .update_draft(&authed.session_id, |draft| draft.select(task_id));
    }
    Ok(redirect(SHIFT_HUB))
}

async fn save_commentary(
    state: AppState,
    session_id: Option<String>,
    form: DraftForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    state
        .sessions
        .update_draft(&authed.session_id, |draft| draft.set_commentary(form.commentary));
    Ok(redirect(SHIFT_HUB))
}

async fn add_evidence(
    state: AppState,
    session_id: Option<String>,
    form: DraftForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let added = state.sessions.update_draft(&authed.session_id, |draft| {
        draft.set_commentary(form.commentary);
        draft.add_evidence(&form.evidence_link)
    });
    if added == Some(false) {
        let message = if form.evidence_link.trim().is_empty() {
            "Enter an evidence link first"
        } else {
            "Evidence must be an http:// or https:// link"
        };
        state.sessions.flash(&authed.session_id, Flash::error(message));
    }
    Ok(redirect(SHIFT_HUB))
}

async fn remove_evidence(
    state: AppState,
    session_id: Option<String>,
    form: DraftForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    state.sessions.update_draft(&authed.session_id, |draft| {
        draft.set_commentary(form.commentary);
        if let Some(index) = form.index {
            draft.remove_evidence(index);
        }
    });
    Ok(redirect(SHIFT_HUB))
}

async fn lock_task(
    state: AppState,
    session_id: Option<String>,
    form: DraftForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let session = authed.session_id.as_str();

    let started = state.sessions.update_draft(session, |draft| {
        draft.set_commentary(form.commentary);
        if draft.task_id().is_none() {
            return Ok(None);
        }
        draft.begin_lock().map(|()| Some(draft.clone()))
    });
    let draft: LockDraft = match started {
        Some(Ok(Some(draft))) => draft,
        Some(Ok(None)) => {
            state.sessions.flash(session, Flash::error("Select a task first"));
            return Ok(redirect(SHIFT_HUB));
        }
        Some(Err(e)) => {
            state.sessions.flash(session, Flash::error(e.user_message()));
            return Ok(redirect(SHIFT_HUB));
        }
        None => return Ok(redirect("/login")),
    };

    let in_flight = InFlightLock::new(&state.sessions, session);
    let result = attempt_lock(&state, &authed, &draft).await;
    in_flight.finish(result.is_ok());

    let flash = match result {
        Ok(outcome) => Flash::success(outcome.summary()),
        Err(LockError::Persistence(e)) if e.is_auth_failure() => {
            return Ok(expire(&state, &authed, e));
        }
        Err(e) => Flash::error(e.user_message()),
    };
    state.sessions.flash(session, flash);
    Ok(redirect(SHIFT_HUB))
}

async fn attempt_lock(
    state: &AppState,
    authed: &Authed,
    draft: &LockDraft,
) -> Result<opsflow_core::LockOutcome, LockError> {
    let Some(task_id) = draft.task_id() else {
        return Err(LockError::TaskNotFound(TaskId::new("")));
    };
    let profile = &authed.operator.profile;
    let task = state
        .board
        .find(&authed.token, profile, task_id)
        .await?
        .ok_or_else(|| LockError::TaskNotFound(task_id.clone()))?;
    let request = LockRequest::new(task, draft.commentary(), draft.evidence().clone());
    state.locks.lock(&authed.token, profile, request).await
}

// -- admin panel -------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct TabQuery {
    tab: Option<String>,
}

fn admin_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let page = warp::get()
        .and(warp::path!("dashboard" / "admin-panel"))
        .and(with_state(state))
        .and(session_id())
        .and(warp::query::<TabQuery>())
        .and_then(admin_panel);

    let create_routine = warp::post()
        .and(warp::path!("dashboard" / "admin-panel" / "routines"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<RoutineForm>())
        .and_then(create_routine);

    let delete_routine = warp::post()
        .and(warp::path!("dashboard" / "admin-panel" / "routines" / "delete"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DeleteForm>())
        .and_then(delete_routine);

    let create_department = warp::post()
        .and(warp::path!("dashboard" / "admin-panel" / "departments"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DepartmentForm>())
        .and_then(create_department);

    let delete_department = warp::post()
        .and(warp::path!("dashboard" / "admin-panel" / "departments" / "delete"))
        .and(with_state(state))
        .and(session_id())
        .and(form::<DeleteForm>())
        .and_then(delete_department);

    page.or(create_routine)
        .unify()
        .or(delete_routine)
        .unify()
        .or(create_department)
        .unify()
        .or(delete_department)
        .unify()
        .boxed()
}

fn admin_tab_url(tab: AdminTab) -> String {
    format!("/dashboard/admin-panel?tab={}", tab.as_str())
}

/// Turn an admin mutation result into its redirect and flash
fn admin_outcome<T>(
    state: &AppState,
    authed: &Authed,
    tab: AdminTab,
    result: Result<T, AdminError>,
    success: &str,
    failure: &str,
) -> Response {
    let flash = match result {
        Ok(_) => Flash::success(success),
        Err(AdminError::Forbidden(_)) => return redirect(SHIFT_HUB),
        Err(AdminError::Backend(e)) if e.is_auth_failure() => return expire(state, authed, e),
        Err(e) => {
            if let AdminError::Backend(cause) = &e {
                tracing::warn!(error = %cause, "{failure}");
            }
            Flash::error(e.user_message(failure))
        }
    };
    state.sessions.flash(&authed.session_id, flash);
    redirect(&admin_tab_url(tab))
}

async fn admin_panel(
    state: AppState,
    session_id: Option<String>,
    query: TabQuery,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let profile = &authed.operator.profile;
    if state.admin.authorize(profile).is_err() {
        return Ok(redirect(SHIFT_HUB));
    }

    let tab = AdminTab::from_query(query.tab.as_deref());
    let mut flash = state.sessions.take_flash(&authed.session_id);
    let (routines, departments) = futures::join!(
        state.admin.list_routines(&authed.token, profile),
        state.admin.list_departments(&authed.token, profile),
    );
    let (routines, departments) = match (routines, departments) {
        (Ok(routines), Ok(departments)) => (routines, departments),
        (Err(AdminError::Backend(e)), _) | (_, Err(AdminError::Backend(e)))
            if e.is_auth_failure() =>
        {
            return Ok(expire(&state, &authed, e));
        }
        (routines, departments) => {
            for e in [routines.as_ref().err(), departments.as_ref().err()]
                .into_iter()
                .flatten()
            {
                tracing::warn!(error = %e, "reference data load failed");
            }
            flash = Some(Flash::error("Failed to load reference data"));
            (
                routines.unwrap_or_default(),
                departments.unwrap_or_default(),
            )
        }
    };

    Ok(html(views::admin_panel(
        profile,
        tab,
        &routines,
        &departments,
        flash.as_ref(),
    )))
}

async fn create_routine(
    state: AppState,
    session_id: Option<String>,
    form: RoutineForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let result = state
        .admin
        .create_routine(&authed.token, &authed.operator.profile, &form)
        .await;
    Ok(admin_outcome(
        &state,
        &authed,
        AdminTab::Routines,
        result,
        "Routine created",
        "Failed to create routine",
    ))
}

async fn delete_routine(
    state: AppState,
    session_id: Option<String>,
    form: DeleteForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let result = state
        .admin
        .delete_routine(&authed.token, &authed.operator.profile, &form)
        .await;
    Ok(admin_outcome(
        &state,
        &authed,
        AdminTab::Routines,
        result,
        "Routine deleted",
        "Failed to delete routine",
    ))
}

async fn create_department(
    state: AppState,
    session_id: Option<String>,
    form: DepartmentForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let result = state
        .admin
        .create_department(&authed.token, &authed.operator.profile, &form)
        .await;
    Ok(admin_outcome(
        &state,
        &authed,
        AdminTab::Departments,
        result,
        "Department created",
        "Failed to create department",
    ))
}

async fn delete_department(
    state: AppState,
    session_id: Option<String>,
    form: DeleteForm,
) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let result = state
        .admin
        .delete_department(&authed.token, &authed.operator.profile, &form)
        .await;
    Ok(admin_outcome(
        &state,
        &authed,
        AdminTab::Departments,
        result,
        "Department deleted",
        "Failed to delete department",
    ))
}

// -- audit ledger ------------------------------------------------------------

fn audit_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    warp::get()
        .and(warp::path!("dashboard" / "audit-ledger"))
        .and(with_state(state))
        .and(session_id())
        .and_then(audit_ledger)
        .boxed()
}

async fn audit_ledger(state: AppState, session_id: Option<String>) -> Result<Response, Infallible> {
    let authed = authed!(state, session_id);
    let (records, error) = match state
        .backend
        .list_audit(&authed.token, state.config.audit_page_size)
        .await
    {
        Ok(records) => (records, None),
        Err(e) if e.is_auth_failure() => return Ok(expire(&state, &authed, e)),
        Err(e) => {
            tracing::warn!(error = %e, "audit ledger load failed");
            (Vec::new(), Some(e.user_message()))
        }
    };
    Ok(html(views::audit_ledger(
        &authed.operator.profile,
        &records,
        error,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_notices() {
        assert_eq!(login_notice(Some("expired")), Some(SESSION_EXPIRED_NOTICE));
        assert_eq!(login_notice(Some("profile")), Some(PROFILE_UNAVAILABLE_NOTICE));
        assert_eq!(login_notice(Some("<script>")), None);
        assert_eq!(login_notice(None), None);
    }

    #[test]
    fn redirect_sets_location() {
        let response = with_cookie(redirect("/login"), &clear_cookie());
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/login");
        assert!(response.headers().contains_key(SET_COOKIE));
    }
}
