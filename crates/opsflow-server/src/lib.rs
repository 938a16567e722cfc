//! OpsFlow Server - the web front end
//!
//! Server-rendered pages over the OpsFlow core services:
//! - `/login`, `/register` and `/logout`
//! - `/dashboard/shift-hub`: today's tasks, the lock draft and the lock action
//! - `/dashboard/admin-panel`: routine and department editor (admins only)
//! - `/dashboard/audit-ledger`: most recent lock events
//!
//! Browser sessions are held server-side in [`SessionStore`]; the cookie only
//! carries an opaque id.

#![warn(unreachable_pub)]

pub mod routes;
pub mod sessions;
pub mod state;
pub mod telemetry;
pub mod views;

pub use routes::routes;
pub use sessions::{Flash, FlashKind, InFlightLock, SessionStore, COOKIE_NAME};
pub use state::AppState;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
