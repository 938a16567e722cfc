//! OpsFlow Backend - hosted data and auth service client
//!
//! [`RestBackend`] implements [`opsflow_core::Backend`] over HTTP. Lock
//! commits go through the `lock_task` database function (see
//! `migrations/0001_lock_task.sql`) so the task update and its audit row are
//! written in one transaction.

#![warn(unreachable_pub)]

pub mod client;

pub use client::{RestBackend, LOCK_TASK_RPC};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
