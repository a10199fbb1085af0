// ============================================================================
// SYNC STATE - Estado de sincronización expuesto a la UI
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::models::{ConnectivityState, SyncStatus, SyncWarning};
use crate::state::reactivity::ReactiveState;

/// Estado de sincronización del feed
#[derive(Clone)]
pub struct SyncStateWrapper {
    pub status: Rc<ReactiveState<SyncStatus>>,
    pub warnings: Rc<RefCell<Vec<SyncWarning>>>,
    pub last_sync_attempt: Rc<RefCell<Option<DateTime<Utc>>>>,
    pub last_successful_sync: Rc<RefCell<Option<DateTime<Utc>>>>,
}

impl SyncStateWrapper {
    pub fn new() -> Self {
        Self {
            status: Rc::new(ReactiveState::new(SyncStatus::Synced)),
            warnings: Rc::new(RefCell::new(Vec::new())),
            last_sync_attempt: Rc::new(RefCell::new(None)),
            last_successful_sync: Rc::new(RefCell::new(None)),
        }
    }

    pub fn get_status(&self) -> SyncStatus {
        self.status.get()
    }

    /// Devuelve `true` si el estado cambió
    pub fn set_status(&self, status: SyncStatus) -> bool {
        self.status.set(status)
    }

    /// Deriva el estado a partir de la conectividad y la queue
    pub fn refresh(&self, connectivity: ConnectivityState, pending: usize, syncing: bool) -> bool {
        let status = match connectivity {
            ConnectivityState::Online if syncing => SyncStatus::Syncing,
            ConnectivityState::Online if pending > 0 => SyncStatus::Pending { count: pending },
            ConnectivityState::Online => SyncStatus::Synced,
            other => SyncStatus::Offline {
                reason: other.to_string(),
                pending_count: pending,
            },
        };
        self.set_status(status)
    }

    pub fn push_warning(&self, warning: SyncWarning) {
        log::warn!("⚠️ {}", warning);
        self.warnings.borrow_mut().push(warning);
    }

    pub fn get_warnings(&self) -> Vec<SyncWarning> {
        self.warnings.borrow().clone()
    }

    /// Vacía los avisos (la UI ya los mostró)
    pub fn take_warnings(&self) -> Vec<SyncWarning> {
        std::mem::take(&mut *self.warnings.borrow_mut())
    }

    pub fn mark_sync_attempt(&self) {
        *self.last_sync_attempt.borrow_mut() = Some(Utc::now());
    }

    pub fn mark_sync_success(&self) {
        *self.last_successful_sync.borrow_mut() = Some(Utc::now());
    }

    pub fn get_last_sync_attempt(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_attempt.borrow()
    }

    pub fn get_last_successful_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_successful_sync.borrow()
    }
}

impl Default for SyncStateWrapper {
    fn default() -> Self {
        Self::new()
    }
}
