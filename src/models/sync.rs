use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::entity::EntityId;
use crate::models::operation::OpId;

/// Estado de conectividad. `NetworkDown` tiene prioridad sobre `ServerDown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    Online,
    NetworkDown,
    ServerDown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityState::Online => "online",
            ConnectivityState::NetworkDown => "network down",
            ConnectivityState::ServerDown => "server down",
        };
        f.write_str(label)
    }
}

/// Evento emitido por el monitor de conectividad
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    StateChanged {
        from: ConnectivityState,
        to: ConnectivityState,
    },
    /// Transición a `Online` desde `NetworkDown` o `ServerDown`
    Reconnected,
}

/// Estado de sincronización para la UI
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    Pending { count: usize },
    Syncing,
    Offline {
        reason: String,
        pending_count: usize,
    },
}

/// Aviso no bloqueante que la UI puede mostrar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncWarning {
    OperationDiscarded { op_id: OpId, reason: String },
    StorageDegraded { kept_fields: Vec<String> },
    QueueDropped { reason: String },
    SessionExpired,
    PushRejected { entity_id: EntityId, reason: String },
    LargeCollection { entities: usize },
    /// La misma operación lleva `failed_passes` pases sin poder enviarse
    ReplayStalled { failed_passes: u32, reason: String },
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncWarning::OperationDiscarded { op_id, reason } => {
                write!(f, "Change {} could not be applied and was discarded: {}", op_id, reason)
            }
            SyncWarning::StorageDegraded { kept_fields } => write!(
                f,
                "Local storage is full; only {} are kept offline",
                kept_fields.join(", ")
            ),
            SyncWarning::QueueDropped { reason } => {
                write!(f, "Pending changes could not be read and were dropped: {}", reason)
            }
            SyncWarning::SessionExpired => f.write_str("Session expired. Please login again."),
            SyncWarning::PushRejected { entity_id, reason } => {
                write!(f, "Local copy of {} was rejected by the server: {}", entity_id, reason)
            }
            SyncWarning::LargeCollection { entities } => write!(
                f,
                "Reconciling {} entities one by one; this does not scale to large feeds",
                entities
            ),
            SyncWarning::ReplayStalled { failed_passes, reason } => write!(
                f,
                "Pending changes could not be sent after {} attempts: {}",
                failed_passes, reason
            ),
        }
    }
}

/// Resultado de un drenaje de la queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub attempted: usize,
    pub confirmed: usize,
    pub discarded: usize,
    /// Error que detuvo el pase (transitorio o de autenticación)
    pub stopped_by: Option<ApiError>,
    /// Operación que no se envió porque su entidad tenía un envío directo
    /// en curso; el pase se cortó ahí para no adelantarla
    pub deferred: Option<OpId>,
    pub warnings: Vec<SyncWarning>,
}

impl PassReport {
    pub fn completed(&self) -> bool {
        self.stopped_by.is_none() && self.deferred.is_none()
    }
}

/// Resultado del barrido de divergencias
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Entidades con operación pendiente: las resuelve la queue
    pub skipped: usize,
    pub stopped_by: Option<ApiError>,
    pub warnings: Vec<SyncWarning>,
}

impl SweepReport {
    pub fn pushed(&self) -> usize {
        self.created + self.updated
    }

    pub fn completed(&self) -> bool {
        self.stopped_by.is_none()
    }
}

/// Un ciclo completo tras `Reconnected`: drenaje, barrido y refetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub pass: PassReport,
    pub sweep: Option<SweepReport>,
    pub refreshed: bool,
}

impl ReconciliationReport {
    /// Error transitorio o de auth que interrumpió el ciclo, si lo hubo
    pub fn interrupted_by(&self) -> Option<&ApiError> {
        self.pass
            .stopped_by
            .as_ref()
            .or_else(|| self.sweep.as_ref().and_then(|s| s.stopped_by.as_ref()))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &SyncWarning> {
        self.pass
            .warnings
            .iter()
            .chain(self.sweep.iter().flat_map(|s| s.warnings.iter()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectOutcome {
    /// Ya había un ciclo en curso: se ejecutará exactamente uno más al final
    Coalesced,
    /// Ciclos ejecutados (el primero más los coalescidos)
    Completed(Vec<ReconciliationReport>),
}

/// Notificaciones del feed hacia la UI
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    ConnectivityChanged {
        from: ConnectivityState,
        to: ConnectivityState,
    },
    StatusChanged(SyncStatus),
    Warning(SyncWarning),
    MirrorUpdated { entities: usize },
}
