// ============================================================================
// FEED VIEWMODEL - Intents del usuario sobre el feed
// ============================================================================
// Aplica cada intent en local al instante, lo envía si se puede y si no lo
// deja en la queue. Reenvía `Reconnected` al motor de reconciliación y
// expone el estado de sincronización a la UI.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use chrono::Utc;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::{FailureClass, StorageError, SyncError};
use crate::models::{
    ConnectivityEvent, ConnectivityState, Entity, EntityId, FeedEvent, Fields, Operation,
    OperationKind, ReconnectOutcome, SyncStatus, SyncWarning,
};
use crate::services::api_client::EntityApi;
use crate::services::cache_service::{LocalMirror, SaveMode};
use crate::services::divergence_service::DivergenceReconciler;
use crate::services::network_monitor::ConnectivityMonitor;
use crate::services::offline_service::OperationQueue;
use crate::services::sync_service::{
    send_operation, EnginePhase, InFlight, ReconciliationEngine, SendOutcome,
};
use crate::state::{EventBus, SyncStateWrapper};
use crate::utils::runtime;
use crate::utils::storage::KeyValueStore;
use crate::utils::{MIRROR_KEY, QUEUE_KEY};
use crate::viewmodels::feed_query::{FeedQuery, FeedStatistics};

pub struct OfflineFeed {
    config: SyncConfig,
    api: Rc<dyn EntityApi>,
    queue: Rc<OperationQueue>,
    mirror: Rc<LocalMirror>,
    monitor: Rc<ConnectivityMonitor>,
    engine: ReconciliationEngine,
    sync_state: SyncStateWrapper,
    events: EventBus<FeedEvent>,
    /// Entidades con un envío directo en curso (compartido con el motor)
    in_flight: InFlight,
    /// La queue persistida se perdió: falta un barrido completo
    recovery_pending: Cell<bool>,
    started: Cell<bool>,
    self_ref: Weak<OfflineFeed>,
}

impl OfflineFeed {
    /// Carga queue y mirror del almacenamiento y prepara monitor y motor.
    /// `link_up` es el estado inicial del enlace (`navigator.onLine`)
    pub fn open(
        config: SyncConfig,
        store: Rc<dyn KeyValueStore>,
        api: Rc<dyn EntityApi>,
        link_up: bool,
    ) -> Rc<Self> {
        let queue = Rc::new(OperationQueue::open(
            store.clone(),
            config.storage_key(QUEUE_KEY),
            config.delete_coalescing,
        ));
        let mirror = Rc::new(LocalMirror::open(
            store,
            config.storage_key(MIRROR_KEY),
            config.minimal_fields(),
        ));
        let monitor = Rc::new(ConnectivityMonitor::new(link_up));
        let in_flight: InFlight = Rc::new(RefCell::new(HashSet::new()));
        let engine = ReconciliationEngine::new(
            api.clone(),
            queue.clone(),
            mirror.clone(),
            DivergenceReconciler::new(config.request_timeout(), config.divergence_warn_threshold),
            config.request_timeout(),
            in_flight.clone(),
        );
        let sync_state = SyncStateWrapper::new();

        let feed = Rc::new_cyclic(|weak: &Weak<OfflineFeed>| {
            let on_connectivity = weak.clone();
            monitor.subscribe(move |event| {
                if let Some(feed) = on_connectivity.upgrade() {
                    feed.on_connectivity_event(event);
                }
            });

            let on_status = weak.clone();
            sync_state.status.subscribe(move |status| {
                if let Some(feed) = on_status.upgrade() {
                    feed.events.emit(&FeedEvent::StatusChanged(status.clone()));
                }
            });

            OfflineFeed {
                config,
                api,
                queue,
                mirror,
                monitor,
                engine,
                sync_state,
                events: EventBus::new(),
                in_flight,
                recovery_pending: Cell::new(false),
                started: Cell::new(false),
                self_ref: weak.clone(),
            }
        });

        if let Some(reason) = feed.queue.dropped_on_load() {
            feed.recovery_pending.set(true);
            feed.warn(SyncWarning::QueueDropped { reason });
        }
        if feed.mirror.is_degraded() {
            feed.warn(SyncWarning::StorageDegraded {
                kept_fields: feed.mirror.minimal_fields().to_vec(),
            });
        }
        feed.refresh_status();

        log::info!(
            "✅ Feed offline abierto: {} entidades, {} operaciones pendientes",
            feed.mirror.len(),
            feed.queue.len()
        );
        feed
    }

    /// Empieza a escuchar `Reconnected` y a sondear el servidor.
    /// Necesita un executor local (navegador o `LocalSet`)
    pub fn start(&self) {
        if self.started.replace(true) {
            log::warn!("⚠️ OfflineFeed: start ya fue llamado, ignorando llamada duplicada");
            return;
        }

        self.monitor.start_probing(
            self.api.clone(),
            self.config.probe_interval(),
            self.config.probe_timeout(),
        );

        // Ya online (p. ej. tras `initial_load`): no habrá transición que
        // dispare la reconciliación de lo que quedó en la queue
        if self.monitor.is_online() {
            self.spawn_reconciliation();
        }
    }

    /// Carga inicial: con servidor alcanzable y nada pendiente, el mirror se
    /// reemplaza por la colección del servidor; si no, se usa el caché
    pub async fn initial_load(&self) -> usize {
        if self.monitor.is_link_up() {
            self.monitor
                .probe_once(self.api.as_ref(), self.config.probe_timeout())
                .await;
        }

        if !self.monitor.is_online() {
            log::info!("📴 Sin servidor, usando caché local ({} entidades)", self.mirror.len());
            return self.mirror.len();
        }

        if !self.queue.is_empty() || self.recovery_pending.get() {
            log::info!("📋 Hay cambios locales sin subir, la reconciliación actualizará el feed");
            return self.mirror.len();
        }

        match self.engine.refresh_mirror().await {
            Ok(count) => {
                log::info!("📥 Feed cargado del servidor: {} entidades", count);
                self.persist_mirror();
                self.events.emit(&FeedEvent::MirrorUpdated { entities: count });
            }
            Err(e) => {
                log::warn!("⚠️ Error cargando feed, usando caché: {}", e);
                if e.is_unreachable() {
                    self.monitor.report_server_unreachable();
                }
            }
        }
        self.mirror.len()
    }

    // ==========================================
    // INTENTS
    // ==========================================

    /// Nueva entidad con id generado en el cliente
    pub async fn create(&self, fields: Fields) -> Result<Entity, SyncError> {
        let mut fields = fields;
        let timestamp_field = self.config.timestamp_field.clone();
        if !fields.contains_key(&timestamp_field) {
            fields.insert(timestamp_field, Value::String(Utc::now().to_rfc3339()));
        }

        let entity = Entity::new(EntityId::generate(), fields);
        log::info!("📝 Crear {}", entity.id);
        let id = entity.id.clone();
        self.submit(Operation::create(&entity)).await?;
        Ok(self.mirror.get(&id).unwrap_or(entity))
    }

    /// Edita una entidad existente; `patch` se mezcla sobre los campos actuales
    pub async fn update(&self, id: &EntityId, patch: Fields) -> Result<Entity, SyncError> {
        let mut edited = self
            .mirror
            .get(id)
            .ok_or_else(|| SyncError::UnknownEntity(id.clone()))?;
        edited.apply_fields(&patch);

        log::info!("📝 Editar {}", id);
        self.submit(Operation::update(id.clone(), edited.fields.clone()))
            .await?;
        Ok(self.mirror.get(id).unwrap_or(edited))
    }

    pub async fn delete(&self, id: &EntityId) -> Result<(), SyncError> {
        if !self.mirror.contains(id) {
            return Err(SyncError::UnknownEntity(id.clone()));
        }
        log::info!("📝 Eliminar {}", id);
        self.submit(Operation::delete(id.clone())).await
    }

    async fn submit(&self, op: Operation) -> Result<(), SyncError> {
        let previous = self.mirror.apply_optimistic(&op);
        self.persist_mirror();
        self.emit_mirror_updated();

        let id = op.entity_id.clone();
        let sending = self.in_flight.borrow().contains(&id);
        let can_send = self.monitor.is_online()
            && !self.queue.has_pending_for(&id)
            && !self.engine.is_running()
            && !sending;

        if !can_send {
            self.enqueue(op)?;
            // Online pero con algo por delante: el siguiente ciclo lo envía.
            // Si la entidad está en vuelo, se relanza cuando vuelva la respuesta
            if self.monitor.is_online() && !sending {
                self.spawn_reconciliation();
            }
            return Ok(());
        }

        self.in_flight.borrow_mut().insert(id.clone());
        let outcome = send_operation(self.api.as_ref(), &op, self.config.request_timeout()).await;
        self.in_flight.borrow_mut().remove(&id);

        // Intents encolados mientras esperábamos la respuesta
        let queued_behind = self.queue.has_pending_for(&id);

        let result = match outcome {
            SendOutcome::Applied(confirmed) => {
                match (op.kind, confirmed) {
                    (OperationKind::Delete, _) => {
                        self.mirror.remove(&id);
                    }
                    (_, Some(entity)) if !queued_behind => self.mirror.merge_confirmed(entity),
                    // Respuesta ilegible o intent más reciente: se queda la copia local
                    _ => {}
                }
                self.persist_mirror();
                self.emit_mirror_updated();
                self.sync_state.mark_sync_success();
                self.refresh_status();
                Ok(())
            }
            SendOutcome::Discard(error) => {
                if queued_behind {
                    // El intent posterior ya decidió cómo debe quedar la entidad
                    log::warn!("🗑️ {} rechazada; manda el intent encolado después: {}", op.op_id(), error);
                } else {
                    log::warn!("↩️ {} rechazada, se deshace en local: {}", op.op_id(), error);
                    self.mirror.restore(&id, previous);
                    self.persist_mirror();
                    self.emit_mirror_updated();
                }
                Err(SyncError::PermanentRemote {
                    op_id: op.op_id(),
                    error,
                })
            }
            SendOutcome::Stop(error) => {
                log::warn!("📥 {} no se pudo enviar, queda en la queue: {}", op.op_id(), error);
                let stored = self.queue.requeue(op).map(|_| ());
                match error.class() {
                    FailureClass::Auth => self.warn(SyncWarning::SessionExpired),
                    _ if error.is_unreachable() => {
                        self.monitor.report_server_unreachable();
                    }
                    _ => {}
                }
                self.stored(stored)
            }
        };

        if queued_behind && self.monitor.is_online() {
            self.spawn_reconciliation();
        }
        result
    }

    fn enqueue(&self, op: Operation) -> Result<(), SyncError> {
        let result = self.queue.enqueue(op).map(|_| ());
        self.stored(result)
    }

    fn stored(&self, result: Result<(), StorageError>) -> Result<(), SyncError> {
        self.refresh_status();
        match result {
            Ok(()) => Ok(()),
            // El cambio sigue en memoria, pero no sobreviviría a un reinicio
            Err(StorageError::QuotaExceeded) => Err(SyncError::LocalStorageExhausted),
            Err(e) => Err(e.into()),
        }
    }

    /// Descarta todos los cambios pendientes. Con servidor disponible, el
    /// mirror vuelve a la versión del servidor
    pub async fn purge_queue(&self) -> Result<usize, SyncError> {
        let purged = self.queue.purge()?;
        self.recovery_pending.set(false);

        if self.monitor.is_online() && !self.engine.is_running() {
            match self.engine.refresh_mirror().await {
                Ok(count) => {
                    self.persist_mirror();
                    self.events.emit(&FeedEvent::MirrorUpdated { entities: count });
                }
                Err(e) => log::warn!("⚠️ Refetch tras purgar fallido: {}", e),
            }
        }

        self.refresh_status();
        Ok(purged)
    }

    // ==========================================
    // RECONCILIACIÓN
    // ==========================================

    /// Ejecuta (o agrupa) una reconciliación completa
    pub async fn handle_reconnected(&self) -> ReconnectOutcome {
        self.sync_state.mark_sync_attempt();
        if self.monitor.is_online() {
            self.sync_state.set_status(SyncStatus::Syncing);
        }

        let outcome = self.engine.on_reconnected().await;

        if let ReconnectOutcome::Completed(reports) = &outcome {
            for report in reports {
                for warning in report.warnings() {
                    self.warn(warning.clone());
                }
            }

            if reports.iter().any(|r| r.refreshed) {
                self.emit_mirror_updated();
            }

            if let Some(last) = reports.last() {
                match last.interrupted_by() {
                    Some(error) if error.is_unreachable() => {
                        self.monitor.report_server_unreachable();
                    }
                    Some(_) => {}
                    None if !last.pass.completed() => {}
                    None => {
                        self.sync_state.mark_sync_success();
                        if last.sweep.as_ref().map_or(false, |s| s.completed()) {
                            self.recovery_pending.set(false);
                        }
                    }
                }
            }
        }

        self.refresh_status();
        outcome
    }

    fn on_connectivity_event(&self, event: &ConnectivityEvent) {
        match event {
            ConnectivityEvent::StateChanged { from, to } => {
                self.events.emit(&FeedEvent::ConnectivityChanged { from: *from, to: *to });
                self.refresh_status();
            }
            ConnectivityEvent::Reconnected => {
                log::info!("🌐 Conexión restaurada - reconciliando");
                if self.started.get() {
                    self.spawn_reconciliation();
                }
            }
        }
    }

    fn spawn_reconciliation(&self) {
        if !self.started.get() {
            return;
        }
        if let Some(feed) = self.self_ref.upgrade() {
            runtime::spawn_local(async move {
                feed.handle_reconnected().await;
            });
        }
    }

    // ==========================================
    // ESTADO
    // ==========================================

    fn refresh_status(&self) {
        self.sync_state.refresh(
            self.monitor.state(),
            self.queue.len(),
            self.engine.is_running(),
        );
    }

    fn warn(&self, warning: SyncWarning) {
        self.sync_state.push_warning(warning.clone());
        self.events.emit(&FeedEvent::Warning(warning));
    }

    fn persist_mirror(&self) {
        match self.mirror.save() {
            Ok(SaveMode::Full) => {}
            Ok(SaveMode::Degraded) => self.warn(SyncWarning::StorageDegraded {
                kept_fields: self.mirror.minimal_fields().to_vec(),
            }),
            Err(e) => log::error!("❌ Mirror sin persistir: {}", e),
        }
    }

    fn emit_mirror_updated(&self) {
        self.events.emit(&FeedEvent::MirrorUpdated {
            entities: self.mirror.len(),
        });
    }

    pub fn status(&self) -> SyncStatus {
        self.sync_state.get_status()
    }

    pub fn warnings(&self) -> Vec<SyncWarning> {
        self.sync_state.get_warnings()
    }

    pub fn take_warnings(&self) -> Vec<SyncWarning> {
        self.sync_state.take_warnings()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&FeedEvent) + 'static,
    {
        self.events.subscribe(listener);
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.mirror.entities()
    }

    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.mirror.get(id)
    }

    pub fn query(&self, query: &FeedQuery) -> Vec<Entity> {
        query.apply(&self.mirror.entities())
    }

    pub fn statistics(&self) -> FeedStatistics {
        FeedStatistics::from_entities(&self.mirror.entities(), &self.config.primary_field)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.state()
    }

    pub fn monitor(&self) -> &Rc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn pending_operations(&self) -> Vec<Operation> {
        self.queue.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn needs_recovery(&self) -> bool {
        self.recovery_pending.get()
    }

    pub fn engine_phase(&self) -> EnginePhase {
        self.engine.phase()
    }

    pub fn is_degraded(&self) -> bool {
        self.mirror.is_degraded()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Último guardado y fin del probe periódico
    pub fn shutdown(&self) {
        self.monitor.stop_probing();
        self.started.set(false);
        if let Err(e) = self.queue.flush() {
            log::error!("❌ Error guardando queue al cerrar: {}", e);
        }
        self.persist_mirror();
        log::info!("👋 Feed offline cerrado ({} operaciones pendientes)", self.queue.len());
    }
}
