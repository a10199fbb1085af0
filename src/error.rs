// ============================================================================
// ERRORES - Taxonomía de fallos del subsistema offline
// ============================================================================
// Ningún error de este módulo es fatal: como mucho, la vista local queda
// desactualizada o degradada.
// ============================================================================

use std::time::Duration;

use thiserror::Error;

use crate::models::{EntityId, OpId};

/// Clasificación de un fallo remoto para decidir reintento o descarte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Recuperable en el próximo `Reconnected`
    Transient,
    /// La operación no se puede aplicar nunca: se descarta
    Permanent,
    /// Credencial caducada: se conserva la operación hasta nuevo login
    Auth,
}

/// Error de una petición HTTP contra el backend CRUD
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Entity not found")]
    NotFound,

    #[error("Unauthorized: session expired")]
    Unauthorized,

    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Parse error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Construye el error correspondiente a un status HTTP no exitoso
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound,
            408 | 429 => ApiError::Server { status },
            s if s >= 500 => ApiError::Server { status: s },
            s => ApiError::Rejected {
                status: s,
                message: message.into(),
            },
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ApiError::Network(_)
            | ApiError::Timeout(_)
            | ApiError::Server { .. }
            | ApiError::Decode(_) => FailureClass::Transient,
            ApiError::NotFound | ApiError::Rejected { .. } => FailureClass::Permanent,
            ApiError::Unauthorized => FailureClass::Auth,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// El fallo dice algo de la conectividad. Un `Decode` llega tras una
    /// respuesta 2xx: el servidor contestó
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::Server { .. }
        )
    }
}

/// Error del almacenamiento local (localStorage, ficheros, memoria)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt blob under '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Error expuesto a la capa de UI por el manejador de intents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Transient network error: {0}")]
    TransientNetwork(ApiError),

    #[error("Operation {op_id} rejected by server: {error}")]
    PermanentRemote { op_id: OpId, error: ApiError },

    #[error("Local storage exhausted, persisted minimal fields only")]
    LocalStorageExhausted,

    #[error("Persisted queue was unreadable and has been dropped: {0}")]
    QueueCorruption(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),
}
