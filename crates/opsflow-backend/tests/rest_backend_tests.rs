//! Exercises `RestBackend` against a local stand-in for the hosted service.

use chrono::{DateTime, Utc};
use opsflow_backend::RestBackend;
use opsflow_core::*;
use opsflow_test_utils::at;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use warp::http::StatusCode;
use warp::Filter;

const ANON: &str = "anon-key";

/// Serve `routes` on an ephemeral port and point a client at it
macro_rules! serve {
    ($routes:expr) => {{
        let (addr, server) = warp::serve($routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        RestBackend::with_client(reqwest::Client::new(), &format!("http://{addr}/"), ANON)
    }};
}

fn token() -> AccessToken {
    AccessToken::new("user-jwt")
}

fn pairs(query: &[(String, String)], key: &str) -> Vec<String> {
    query
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .collect()
}

#[tokio::test]
async fn test_sign_in_posts_password_grant() {
    let routes = warp::post()
        .and(warp::path!("auth" / "v1" / "token"))
        .and(warp::query::<Vec<(String, String)>>())
        .and(warp::header::exact("apikey", ANON))
        .and(warp::header::exact("authorization", "Bearer anon-key"))
        .and(warp::body::json())
        .map(|query: Vec<(String, String)>, body: Value| {
            if pairs(&query, "grant_type") != ["password"] || body["password"] != "pw" {
                return warp::reply::with_status(warp::reply::json(&json!({})), StatusCode::BAD_REQUEST);
            }
            warp::reply::with_status(
                warp::reply::json(&json!({
                    "access_token": "user-jwt",
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "refresh_token": "r",
                    "user": {
                        "id": "7d9a3c2e-5b1f-4c8e-9a0d-2f6b8e1c4a55",
                        "email": body["email"],
                        "aud": "authenticated"
                    }
                })),
                StatusCode::OK,
            )
        });
    let backend = serve!(routes);

    let session = backend.sign_in("op@example.com", "pw").await.unwrap();
    assert_eq!(session.access_token.expose(), "user-jwt");
    assert_eq!(session.user.email.as_deref(), Some("op@example.com"));
    assert_eq!(session.expires_in, Some(3600));
}

#[tokio::test]
async fn test_refresh_session_posts_refresh_grant() {
    let routes = warp::post()
        .and(warp::path!("auth" / "v1" / "token"))
        .and(warp::query::<Vec<(String, String)>>())
        .and(warp::header::exact("apikey", ANON))
        .and(warp::header::exact("authorization", "Bearer anon-key"))
        .and(warp::body::json())
        .map(|query: Vec<(String, String)>, body: Value| {
            if pairs(&query, "grant_type") != ["refresh_token"] || body["refresh_token"] != "r1" {
                return warp::reply::with_status(
                    warp::reply::json(&json!({
                        "error": "invalid_grant",
                        "error_description": "Invalid Refresh Token: Refresh Token Not Found"
                    })),
                    StatusCode::BAD_REQUEST,
                );
            }
            warp::reply::with_status(
                warp::reply::json(&json!({
                    "access_token": "jwt-2",
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "refresh_token": "r2",
                    "user": { "id": "7d9a3c2e-5b1f-4c8e-9a0d-2f6b8e1c4a55" }
                })),
                StatusCode::OK,
            )
        });
    let backend = serve!(routes);

    let session = backend.refresh_session(&RefreshToken::new("r1")).await.unwrap();
    assert_eq!(session.access_token.expose(), "jwt-2");
    assert_eq!(session.refresh_token.map(|r| r.expose().to_string()).as_deref(), Some("r2"));

    let err = backend.refresh_session(&RefreshToken::new("spent")).await.unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 400, .. }));
}

#[tokio::test]
async fn test_sign_in_failure_carries_backend_message() {
    let routes = warp::path!("auth" / "v1" / "token").map(|| {
        warp::reply::with_status(
            warp::reply::json(&json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
            StatusCode::BAD_REQUEST,
        )
    });
    let backend = serve!(routes);

    let err = backend.sign_in("op@example.com", "nope").await.unwrap_err();
    assert_eq!(
        err,
        BackendError::Status {
            status: 400,
            message: "Invalid login credentials".into()
        }
    );
}

#[tokio::test]
async fn test_sign_up_sends_profile_metadata() {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let capture = seen.clone();
    let routes = warp::post()
        .and(warp::path!("auth" / "v1" / "signup"))
        .and(warp::body::json())
        .map(move |body: Value| {
            *capture.lock().unwrap() = Some(body);
            warp::reply::json(&json!({ "id": "7d9a3c2e-5b1f-4c8e-9a0d-2f6b8e1c4a55" }))
        });
    let backend = serve!(routes);

    backend
        .sign_up(&SignUp {
            email: "new@example.com".into(),
            password: "pw".into(),
            full_name: "New Operator".into(),
            department: "Repayment".into(),
        })
        .await
        .unwrap();

    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["data"], json!({ "full_name": "New Operator", "department": "Repayment" }));
    assert_eq!(body["email"], "new@example.com");
}

#[tokio::test]
async fn test_expired_token_is_auth_failure() {
    let routes = warp::path!("auth" / "v1" / "user").map(|| {
        warp::reply::with_status(
            warp::reply::json(&json!({ "msg": "invalid JWT: token is expired" })),
            StatusCode::UNAUTHORIZED,
        )
    });
    let backend = serve!(routes);

    let err = backend.current_user(&token()).await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(
        err,
        BackendError::Unauthenticated("invalid JWT: token is expired".into())
    );
}

#[tokio::test]
async fn test_list_tasks_filters_department_and_day() {
    let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let capture = seen.clone();
    let routes = warp::get()
        .and(warp::path!("rest" / "v1" / "task_instances"))
        .and(warp::header::exact("authorization", "Bearer user-jwt"))
        .and(warp::query::<Vec<(String, String)>>())
        .map(move |query: Vec<(String, String)>| {
            *capture.lock().unwrap() = query;
            warp::reply::json(&json!([
                {
                    "id": 11,
                    "routine_id": "OPS-CASH-001",
                    "department": "Disbursement",
                    "scheduled_time": "2026-10-19T08:00:00+00:00",
                    "status": "Pending",
                    "evidence": null
                },
                {
                    "id": 12,
                    "routine_id": "OPS-CASH-001",
                    "department": "Disbursement",
                    "scheduled_time": "2026-10-19T10:00:00+00:00",
                    "status": "Locked",
                    "commentary": "done",
                    "evidence": "[\"https://drive.example/a\"]",
                    "tat_actual_minutes": 12,
                    "tat_breached": false
                }
            ]))
        });
    let backend = serve!(routes);

    let tasks = backend
        .list_tasks(
            &token(),
            &TaskQuery {
                department: "Disbursement".into(),
                from: at("2026-10-19T00:00:00Z"),
                until: at("2026-10-20T00:00:00Z"),
            },
        )
        .await
        .unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, TaskId::new("11"));
    assert!(tasks[1].is_locked());
    assert_eq!(tasks[1].evidence.links(), ["https://drive.example/a".to_string()]);

    let query = seen.lock().unwrap().clone();
    assert_eq!(pairs(&query, "department"), ["eq.Disbursement"]);
    assert_eq!(
        pairs(&query, "scheduled_time"),
        ["gte.2026-10-19T00:00:00Z", "lt.2026-10-20T00:00:00Z"]
    );
    assert_eq!(pairs(&query, "order"), ["scheduled_time.asc"]);
}

#[tokio::test]
async fn test_malformed_row_is_rejected() {
    let routes = warp::path!("rest" / "v1" / "task_instances").map(|| {
        warp::reply::json(&json!([
            { "id": 1, "routine_id": "R", "department": "D", "scheduled_time": "yesterday" }
        ]))
    });
    let backend = serve!(routes);

    let err = backend
        .list_tasks(
            &token(),
            &TaskQuery {
                department: "D".into(),
                from: at("2026-10-19T00:00:00Z"),
                until: at("2026-10-20T00:00:00Z"),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::MalformedRow {
            table: "task_instances",
            ..
        }
    ));
}

#[tokio::test]
async fn test_single_row_fetch_handles_empty_result() {
    let routes = warp::path!("rest" / "v1" / "routines")
        .and(warp::query::<Vec<(String, String)>>())
        .map(|query: Vec<(String, String)>| {
            if pairs(&query, "id") == ["eq.OPS-CASH-001"] && pairs(&query, "limit") == ["1"] {
                warp::reply::json(&json!([{
                    "id": "OPS-CASH-001",
                    "name": "Cash reconciliation",
                    "department_id": 1,
                    "frequency": "Daily",
                    "tat_minutes": 45,
                    "start_time": "08:00:00",
                    "is_active": true
                }]))
            } else {
                warp::reply::json(&json!([]))
            }
        });
    let backend = serve!(routes);

    let routine = backend
        .fetch_routine(&token(), &RoutineId::new("OPS-CASH-001"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(routine.tat_minutes, 45);
    assert_eq!(routine.department_id, DepartmentId::new("1"));
    assert!(backend
        .fetch_routine(&token(), &RoutineId::new("OPS-NONE"))
        .await
        .unwrap()
        .is_none());
}

fn lock_commit(locked_time: DateTime<Utc>) -> LockCommit {
    let actor = UserId::new();
    LockCommit {
        task_id: TaskId::new("11"),
        update: TaskLockUpdate {
            status: TaskStatus::Locked,
            commentary: "reconciled".into(),
            evidence: Evidence::from_links(["https://drive.example/a"]),
            assigned_operator: actor,
            locked_time,
            tat_actual_minutes: 50,
            tat_breached: true,
        },
        audit: NewAuditRecord {
            task_id: TaskId::new("11"),
            action: AuditAction::Locked,
            actor_id: actor,
            actor_role: Role::Operator,
            details: AuditDetails {
                tat_actual_minutes: 50,
                tat_breached: true,
            },
        },
    }
}

#[tokio::test]
async fn test_commit_lock_calls_rpc() {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let capture = seen.clone();
    let routes = warp::post()
        .and(warp::path!("rest" / "v1" / "rpc" / "lock_task"))
        .and(warp::body::json())
        .map(move |body: Value| {
            *capture.lock().unwrap() = Some(body);
            warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT)
        });
    let backend = serve!(routes);

    backend
        .commit_lock(&token(), &lock_commit(at("2026-10-19T08:50:00Z")))
        .await
        .unwrap();

    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["p_task_id"], "11");
    assert_eq!(body["p_evidence"], "[\"https://drive.example/a\"]");
    assert_eq!(body["p_tat_actual_minutes"], 50);
    assert_eq!(body["p_tat_breached"], true);
    assert_eq!(body["p_actor_role"], "operator");
    assert_eq!(
        body["p_details"],
        json!({ "tat_actual_minutes": 50, "tat_breached": true })
    );
}

#[tokio::test]
async fn test_commit_lock_on_locked_task_conflicts() {
    let routes = warp::path!("rest" / "v1" / "rpc" / "lock_task").map(|| {
        warp::reply::with_status(
            warp::reply::json(&json!({
                "code": "PT409",
                "message": "task 11 is not pending",
                "details": null,
                "hint": null
            })),
            StatusCode::CONFLICT,
        )
    });
    let backend = serve!(routes);

    let err = backend
        .commit_lock(&token(), &lock_commit(at("2026-10-19T08:50:00Z")))
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Conflict("task 11 is not pending".into()));
}

#[tokio::test]
async fn test_audit_newest_first_with_limit() {
    let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let capture = seen.clone();
    let routes = warp::path!("rest" / "v1" / "audit_ledger")
        .and(warp::query::<Vec<(String, String)>>())
        .map(move |query: Vec<(String, String)>| {
            *capture.lock().unwrap() = query;
            warp::reply::json(&json!([{
                "id": 3,
                "task_id": 11,
                "action": "Locked",
                "actor_id": "7d9a3c2e-5b1f-4c8e-9a0d-2f6b8e1c4a55",
                "actor_role": "admin",
                "details": { "tat_actual_minutes": 50, "tat_breached": true },
                "created_at": "2026-10-19T08:50:00.123+00:00"
            }]))
        });
    let backend = serve!(routes);

    let records = backend.list_audit(&token(), 25).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].actor_role, Some(Role::Admin));
    assert!(records[0].details.tat_breached);

    let query = seen.lock().unwrap().clone();
    assert_eq!(pairs(&query, "order"), ["created_at.desc"]);
    assert_eq!(pairs(&query, "limit"), ["25"]);
}

#[tokio::test]
async fn test_insert_department_posts_row() {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let capture = seen.clone();
    let routes = warp::post()
        .and(warp::path!("rest" / "v1" / "departments"))
        .and(warp::header::exact("prefer", "return=minimal"))
        .and(warp::body::json())
        .map(move |body: Value| {
            *capture.lock().unwrap() = Some(body);
            warp::reply::with_status(warp::reply(), StatusCode::CREATED)
        });
    let backend = serve!(routes);

    let department = DepartmentForm {
        name: "Treasury".into(),
        ..DepartmentForm::default()
    }
    .validate()
    .unwrap();
    backend.insert_department(&token(), &department).await.unwrap();

    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(
        body,
        json!({
            "name": "Treasury",
            "description": "",
            "operating_hours_start": "08:00:00",
            "operating_hours_end": "17:00:00"
        })
    );
}

#[tokio::test]
async fn test_delete_filters_by_id() {
    let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let capture = seen.clone();
    let routes = warp::delete()
        .and(warp::path!("rest" / "v1" / "routines"))
        .and(warp::query::<Vec<(String, String)>>())
        .map(move |query: Vec<(String, String)>| {
            *capture.lock().unwrap() = query;
            warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT)
        });
    let backend = serve!(routes);

    backend
        .delete_routine(&token(), &RoutineId::new("OPS-CASH-001"))
        .await
        .unwrap();
    assert_eq!(pairs(&seen.lock().unwrap(), "id"), ["eq.OPS-CASH-001"]);
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let backend = RestBackend::with_client(
        reqwest::Client::new(),
        &format!("http://127.0.0.1:{port}"),
        ANON,
    );
    let err = backend.list_routines(&token()).await.unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)));
}
