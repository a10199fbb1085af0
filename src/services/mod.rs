// ============================================================================
// SERVICES - Subsistema offline: almacenamiento, conectividad y sincronización
// ============================================================================

pub mod api_client;
pub mod cache_service;
pub mod divergence_service;
pub mod network_monitor;
pub mod offline_service;
pub mod sync_service;

pub use api_client::{ApiClient, CredentialProvider, EntityApi, StoredCredentials};
pub use cache_service::{LocalMirror, MirrorCache, SaveMode};
pub use divergence_service::DivergenceReconciler;
pub use network_monitor::ConnectivityMonitor;
pub use offline_service::{EnqueueOutcome, OperationQueue};
pub use sync_service::{EnginePhase, InFlight, ReconciliationEngine};
