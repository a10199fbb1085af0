// ============================================================================
// OFFLINE FEED - Cliente offline-first del feed de posts
// ============================================================================
// Arquitectura:
// - Models: Entidades, operaciones y eventos de sincronización
// - Services: Almacenamiento, conectividad, queue y reconciliación
// - State: Estado reactivo con Rc<RefCell>
// - ViewModels: Intents del usuario y consultas sobre el feed
// - Web: Integración con el navegador (wasm32)
// ============================================================================

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;
pub mod viewmodels;

#[cfg(target_arch = "wasm32")]
pub mod web;

#[cfg(test)]
mod tests;

pub use config::{DeleteCoalescing, SyncConfig, CONFIG};
pub use error::{ApiError, FailureClass, StorageError, SyncError};
pub use models::{
    ConnectivityEvent, ConnectivityState, Entity, EntityId, FeedEvent, Fields, OpId, Operation,
    OperationKind, ReconciliationReport, ReconnectOutcome, SyncStatus, SyncWarning,
};
pub use services::{
    ApiClient, ConnectivityMonitor, CredentialProvider, EntityApi, LocalMirror, OperationQueue,
    ReconciliationEngine, StoredCredentials,
};
pub use utils::storage::{KeyValueStore, MemoryStore};
pub use viewmodels::{FeedQuery, FeedStatistics, OfflineFeed, SortOrder};

#[cfg(not(target_arch = "wasm32"))]
pub use utils::storage::FileStore;
