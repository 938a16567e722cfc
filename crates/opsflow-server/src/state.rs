//! Shared handler state, built once at startup

use crate::sessions::SessionStore;
use opsflow_core::{
    Accounts, AdminEditor, AppConfig, Backend, Clock, LockService, SessionGate, TaskBoard,
};
use std::sync::Arc;

/// Everything a request handler needs
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<AppConfig>,
    /// Backend handle
    pub backend: Arc<dyn Backend>,
    /// Clock
    pub clock: Arc<dyn Clock>,
    /// Browser sessions
    pub sessions: SessionStore,
    /// Session gate
    pub gate: SessionGate,
    /// Task list loader
    pub board: TaskBoard,
    /// Lock transition
    pub locks: LockService,
    /// Reference-data editor
    pub admin: AdminEditor,
    /// Login / registration
    pub accounts: Accounts,
}

impl AppState {
    /// Wire the services around one backend and clock
    #[must_use]
    pub fn new(config: AppConfig, backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        let gate = SessionGate::new(backend.clone());
        let board = TaskBoard::new(backend.clone(), clock.clone());
        let locks = LockService::new(backend.clone(), clock.clone(), config.shift);
        let admin = AdminEditor::new(backend.clone());
        let accounts = Accounts::new(backend.clone(), config.departments.clone());
        Self {
            config: Arc::new(config),
            backend,
            clock,
            sessions: SessionStore::new(),
            gate,
            board,
            locks,
            admin,
            accounts,
        }
    }

    /// Check if locks are refused right now
    #[must_use]
    pub fn shift_ended(&self) -> bool {
        self.config.shift.has_ended(self.clock.now())
    }
}
