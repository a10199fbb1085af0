// ============================================================================
// MOTOR DE RECONCILIACIÓN
// ============================================================================
// Tras cada `Reconnected`: drena la queue en orden, corrige divergencias
// (gana la copia local) y, si algo cambió en el servidor, vuelve a pedir la
// colección completa. Solo un ciclo a la vez; los eventos que llegan durante
// un ciclo se agrupan en exactamente un ciclo más.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{ApiError, FailureClass, SyncError};
use crate::models::{
    Entity, EntityId, OpId, Operation, OperationKind, PassReport, ReconciliationReport, ReconnectOutcome,
    SyncWarning,
};
use crate::services::api_client::EntityApi;
use crate::services::cache_service::{LocalMirror, SaveMode};
use crate::services::divergence_service::DivergenceReconciler;
use crate::services::offline_service::OperationQueue;
use crate::utils::runtime::with_timeout;
use crate::utils::STALLED_PASS_WARNING;

/// Entidades con un envío directo en curso, compartidas entre el feed y el
/// motor: la réplica no adelanta a una petición que aún no ha vuelto
pub type InFlight = Rc<RefCell<HashSet<EntityId>>>;

/// Fase del motor (para la UI y los logs)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Draining,
    Sending(OpId),
    Sweeping,
    Refreshing,
}

/// Resultado de enviar una operación al servidor
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SendOutcome {
    /// Confirmada; `None` para Delete
    Applied(Option<Entity>),
    /// Rechazo permanente: la operación no se podrá aplicar nunca
    Discard(ApiError),
    /// Fallo transitorio o de autenticación: se conserva y se para el pase
    Stop(ApiError),
}

/// Limita una petición a `limit`; vencer cuenta como fallo transitorio
pub(crate) async fn request_with_timeout<T, F>(limit: Duration, request: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match with_timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout(limit)),
    }
}

/// Envía una operación y clasifica el resultado
pub(crate) async fn send_operation(api: &dyn EntityApi, op: &Operation, limit: Duration) -> SendOutcome {
    let result = match op.kind {
        OperationKind::Create => {
            accepted_without_body(op, request_with_timeout(limit, api.create(&op.as_entity())).await)
        }
        OperationKind::Update => {
            let payload = op.payload.clone().unwrap_or_default();
            accepted_without_body(
                op,
                request_with_timeout(limit, api.update(&op.entity_id, &payload)).await,
            )
        }
        OperationKind::Delete => match request_with_timeout(limit, api.delete(&op.entity_id)).await {
            // Ya no existe: el objetivo del Delete se cumplió
            Ok(()) | Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(entity) => SendOutcome::Applied(entity),
        Err(error) => match error.class() {
            FailureClass::Permanent => SendOutcome::Discard(error),
            FailureClass::Transient | FailureClass::Auth => SendOutcome::Stop(error),
        },
    }
}

/// `Decode` solo aparece con status 2xx: el servidor aplicó la escritura
/// aunque su respuesta no se pueda leer. El refetch traerá la versión buena
fn accepted_without_body(op: &Operation, result: Result<Entity, ApiError>) -> Result<Option<Entity>, ApiError> {
    match result {
        Ok(entity) => Ok(Some(entity)),
        Err(ApiError::Decode(reason)) => {
            log::warn!("⚠️ {} aceptada con respuesta ilegible: {}", op.op_id(), reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Libera el guard aunque el futuro se abandone a mitad de ciclo
struct RunGuard<'a> {
    running: &'a Cell<bool>,
    phase: &'a RefCell<EnginePhase>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.set(false);
        *self.phase.borrow_mut() = EnginePhase::Idle;
    }
}

pub struct ReconciliationEngine {
    api: Rc<dyn EntityApi>,
    queue: Rc<OperationQueue>,
    mirror: Rc<LocalMirror>,
    divergence: DivergenceReconciler,
    request_timeout: Duration,
    in_flight: InFlight,
    phase: RefCell<EnginePhase>,
    running: Cell<bool>,
    rerun_requested: Cell<bool>,
}

impl ReconciliationEngine {
    pub fn new(
        api: Rc<dyn EntityApi>,
        queue: Rc<OperationQueue>,
        mirror: Rc<LocalMirror>,
        divergence: DivergenceReconciler,
        request_timeout: Duration,
        in_flight: InFlight,
    ) -> Self {
        Self {
            api,
            queue,
            mirror,
            divergence,
            request_timeout,
            in_flight,
            phase: RefCell::new(EnginePhase::Idle),
            running: Cell::new(false),
            rerun_requested: Cell::new(false),
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn set_phase(&self, phase: EnginePhase) {
        *self.phase.borrow_mut() = phase;
    }

    /// Punto de entrada para cada `Reconnected`
    pub async fn on_reconnected(&self) -> ReconnectOutcome {
        if self.running.replace(true) {
            log::info!("🔁 Reconciliación en curso, se repetirá al terminar");
            self.rerun_requested.set(true);
            return ReconnectOutcome::Coalesced;
        }
        let _guard = RunGuard {
            running: &self.running,
            phase: &self.phase,
        };

        let mut reports = Vec::new();
        loop {
            self.rerun_requested.set(false);
            reports.push(self.reconcile().await);
            if !self.rerun_requested.get() {
                break;
            }
            log::info!("🔁 Reconnected durante el ciclo, ejecutando uno más");
        }

        ReconnectOutcome::Completed(reports)
    }

    /// Un ciclo: drenaje, barrido de divergencias y refetch
    async fn reconcile(&self) -> ReconciliationReport {
        log::info!("🔄 Reconciliación: {} operaciones pendientes", self.queue.len());

        let pass = self.drain().await;
        let mut report = ReconciliationReport {
            pass,
            sweep: None,
            refreshed: false,
        };

        if let Some(error) = report.pass.stopped_by.clone() {
            self.record_failed_pass(&error, &mut report.pass.warnings);
            return report;
        }
        // El envío directo en curso relanzará la reconciliación al volver
        if report.pass.deferred.is_some() {
            self.persist_mirror(&mut report.pass.warnings);
            return report;
        }

        self.set_phase(EnginePhase::Sweeping);
        let sweep = self
            .divergence
            .sweep(self.api.as_ref(), &self.queue, &self.mirror)
            .await;
        let pushed = sweep.pushed();
        let interrupted = sweep.stopped_by.clone();
        report.sweep = Some(sweep);

        if let Some(error) = interrupted {
            // Sin barrido completo no hay refetch: borraría copias locales sin subir
            self.record_failed_pass(&error, &mut report.pass.warnings);
            self.persist_mirror(&mut report.pass.warnings);
            return report;
        }

        if let Err(e) = self.queue.reset_failures() {
            log::error!("❌ Error guardando queue: {}", e);
        }

        if report.pass.confirmed > 0 || report.pass.discarded > 0 || pushed > 0 {
            self.set_phase(EnginePhase::Refreshing);
            match self.refresh_mirror().await {
                Ok(count) => {
                    log::info!("📥 Mirror actualizado: {} entidades", count);
                    report.refreshed = true;
                }
                Err(e) => log::warn!("⚠️ Refetch fallido, se conserva el mirror: {}", e),
            }
        }

        self.persist_mirror(&mut report.pass.warnings);
        log::info!(
            "✅ Reconciliación terminada: {} confirmadas, {} descartadas, {} subidas",
            report.pass.confirmed,
            report.pass.discarded,
            pushed
        );
        report
    }

    /// Envía la queue en orden. Se detiene en el primer fallo transitorio o
    /// de autenticación; los rechazos permanentes se descartan y se sigue
    pub async fn drain(&self) -> PassReport {
        let mut report = PassReport::default();
        self.set_phase(EnginePhase::Draining);

        for queued in self.queue.snapshot() {
            let op_id = queued.op_id();
            // Se relee la entrada: puede haberse reemplazado, anulado o purgado
            let op = match self.queue.get(&op_id) {
                Some(op) => op,
                None => {
                    log::debug!("⏭️ {} ya no está en la queue", op_id);
                    continue;
                }
            };

            if self.in_flight.borrow().contains(&op.entity_id) {
                log::info!("⏳ {} espera a un envío directo en curso de la misma entidad", op_id);
                report.deferred = Some(op_id);
                break;
            }

            report.attempted += 1;
            self.set_phase(EnginePhase::Sending(op_id.clone()));
            log::info!("📤 Reenviando {} {}", op.kind.method(), op_id);

            match send_operation(self.api.as_ref(), &op, self.request_timeout).await {
                SendOutcome::Applied(confirmed) => {
                    report.confirmed += 1;
                    self.settle(&op, confirmed);
                }
                SendOutcome::Discard(error) => {
                    report.discarded += 1;
                    self.discard(&op, &error, &mut report.warnings);
                }
                SendOutcome::Stop(error) => {
                    log::warn!("⏸️ Pase detenido en {}: {}", op_id, error);
                    if error.class() == FailureClass::Auth {
                        report.warnings.push(SyncWarning::SessionExpired);
                    }
                    report.stopped_by = Some(error);
                    break;
                }
            }
            self.set_phase(EnginePhase::Draining);
        }

        report
    }

    fn settle(&self, sent: &Operation, confirmed: Option<Entity>) {
        if let Err(e) = self.queue.settle(sent) {
            log::error!("❌ Error guardando queue tras confirmar {}: {}", sent.op_id(), e);
        }

        match (sent.kind, confirmed) {
            (OperationKind::Delete, _) => {
                self.mirror.remove(&sent.entity_id);
            }
            // Con un intent más reciente pendiente, la vista local ya va por delante
            (_, Some(entity)) if !self.queue.has_pending_for(&entity.id) => {
                self.mirror.merge_confirmed(entity);
            }
            _ => {}
        }
    }

    fn discard(&self, op: &Operation, error: &ApiError, warnings: &mut Vec<SyncWarning>) {
        let op_id = op.op_id();
        log::warn!("🗑️ {} rechazada por el servidor, se descarta: {}", op_id, error);
        if let Err(e) = self.queue.dequeue_confirmed(&op_id) {
            log::error!("❌ Error guardando queue tras descartar {}: {}", op_id, e);
        }

        // Una copia local que el servidor nunca aceptará no debe volver a
        // subirse en el barrido de divergencias
        let orphaned = op.kind == OperationKind::Create
            || (op.kind == OperationKind::Update && *error == ApiError::NotFound);
        if orphaned && !self.queue.has_pending_for(&op.entity_id) {
            self.mirror.remove(&op.entity_id);
        }

        warnings.push(SyncWarning::OperationDiscarded {
            op_id,
            reason: error.to_string(),
        });
    }

    /// Pide la colección autoritativa, la vuelca en el mirror y reaplica
    /// encima las operaciones aún pendientes
    pub async fn refresh_mirror(&self) -> Result<usize, ApiError> {
        let entities = request_with_timeout(self.request_timeout, self.api.list()).await?;
        let count = self.mirror.replace(entities);
        for op in self.queue.snapshot() {
            self.mirror.apply_optimistic(&op);
        }
        Ok(count)
    }

    fn record_failed_pass(&self, error: &ApiError, warnings: &mut Vec<SyncWarning>) {
        if let Err(e) = self.queue.record_failed_pass(error.to_string()) {
            log::error!("❌ Error guardando queue: {}", e);
        }
        let failed_passes = self.queue.failed_passes();
        if failed_passes == STALLED_PASS_WARNING {
            warnings.push(SyncWarning::ReplayStalled {
                failed_passes,
                reason: error.to_string(),
            });
        }
    }

    fn persist_mirror(&self, warnings: &mut Vec<SyncWarning>) {
        match self.mirror.save() {
            Ok(SaveMode::Full) => {}
            Ok(SaveMode::Degraded) => warnings.push(SyncWarning::StorageDegraded {
                kept_fields: self.mirror.minimal_fields().to_vec(),
            }),
            Err(SyncError::LocalStorageExhausted) => {
                log::error!("❌ Mirror sin persistir: almacenamiento agotado");
            }
            Err(e) => log::error!("❌ Error guardando mirror: {}", e),
        }
    }
}
