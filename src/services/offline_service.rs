// ============================================================================
// QUEUE DURABLE DE OPERACIONES PENDIENTES
// ============================================================================
// Cada mutación se guarda en el almacenamiento local antes de devolver el
// control. Una operación solo sale de la queue cuando el servidor la confirma
// (o la rechaza de forma permanente).
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DeleteCoalescing;
use crate::error::StorageError;
use crate::models::{EntityId, OpId, Operation, OperationKind};
use crate::utils::storage::{load_from_storage, save_to_storage, KeyValueStore};
use crate::utils::STORAGE_FORMAT_VERSION;

/// Formato persistido de la queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQueue {
    version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    failed_passes: u32,
    #[serde(default)]
    last_failure: Option<String>,
    operations: Vec<Operation>,
}

/// Qué hizo `enqueue` con la operación
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Nueva entrada al final de la queue
    Appended,
    /// Ya había una operación con el mismo `OpId`: se actualizó el payload
    /// conservando la posición
    Replaced,
    /// El Delete eliminó operaciones previas de la entidad y se encoló
    Superseded { removed: usize },
    /// El Create nunca salió del cliente: Create, Update y Delete se anulan
    Collapsed { removed: usize },
}

pub struct OperationQueue {
    store: Rc<dyn KeyValueStore>,
    key: String,
    coalescing: DeleteCoalescing,
    entries: RefCell<Vec<Operation>>,
    failed_passes: Cell<u32>,
    last_failure: RefCell<Option<String>>,
    /// Motivo por el que se descartó la queue persistida al abrir
    dropped_on_load: RefCell<Option<String>>,
}

impl OperationQueue {
    /// Abre la queue persistida bajo `key`. Un blob ilegible o de otra
    /// versión se descarta: la queue arranca vacía y queda marcada para
    /// que el llamador programe un barrido de recuperación
    pub fn open(store: Rc<dyn KeyValueStore>, key: impl Into<String>, coalescing: DeleteCoalescing) -> Self {
        let key = key.into();
        let queue = Self {
            store,
            key,
            coalescing,
            entries: RefCell::new(Vec::new()),
            failed_passes: Cell::new(0),
            last_failure: RefCell::new(None),
            dropped_on_load: RefCell::new(None),
        };

        match load_from_storage::<PersistedQueue>(queue.store.as_ref(), &queue.key) {
            Ok(Some(persisted)) if persisted.version == STORAGE_FORMAT_VERSION => {
                log::info!(
                    "📋 Queue cargada: {} operaciones, {} pases fallidos",
                    persisted.operations.len(),
                    persisted.failed_passes
                );
                *queue.entries.borrow_mut() = persisted.operations;
                queue.failed_passes.set(persisted.failed_passes);
                *queue.last_failure.borrow_mut() = persisted.last_failure;
            }
            Ok(Some(persisted)) => {
                queue.drop_persisted(format!(
                    "unsupported queue format version {}",
                    persisted.version
                ));
            }
            Ok(None) => log::info!("📋 Sin queue persistida"),
            Err(StorageError::Corrupt { reason, .. }) => queue.drop_persisted(reason),
            Err(e) => {
                // Almacenamiento no disponible: no hay nada que recuperar
                log::error!("❌ Error leyendo queue: {}", e);
            }
        }

        queue
    }

    fn drop_persisted(&self, reason: String) {
        log::error!("❌ Queue persistida ilegible, se descarta: {}", reason);
        *self.dropped_on_load.borrow_mut() = Some(reason);
        if let Err(e) = self.flush() {
            log::error!("❌ Error reescribiendo queue vacía: {}", e);
        }
    }

    /// `Some(motivo)` si la queue persistida se descartó al abrir
    pub fn dropped_on_load(&self) -> Option<String> {
        self.dropped_on_load.borrow().clone()
    }

    pub fn coalescing(&self) -> DeleteCoalescing {
        self.coalescing
    }

    /// Encola una operación. Si la escritura durable falla, el cambio se
    /// conserva en memoria y se devuelve el error de almacenamiento
    pub fn enqueue(&self, op: Operation) -> Result<EnqueueOutcome, StorageError> {
        let op_id = op.op_id();
        let outcome = {
            let mut entries = self.entries.borrow_mut();
            match op.kind {
                OperationKind::Create | OperationKind::Update => {
                    Self::upsert(&mut entries, op)
                }
                OperationKind::Delete => Self::enqueue_delete(&mut entries, op, self.coalescing),
            }
        };

        log::info!("📝 Queue {}: {:?} (total {})", op_id, outcome, self.len());
        self.flush()?;
        Ok(outcome)
    }

    fn upsert(entries: &mut Vec<Operation>, op: Operation) -> EnqueueOutcome {
        let op_id = op.op_id();
        match entries.iter_mut().find(|e| e.op_id() == op_id) {
            Some(existing) => {
                existing.payload = op.payload;
                EnqueueOutcome::Replaced
            }
            None => {
                entries.push(op);
                EnqueueOutcome::Appended
            }
        }
    }

    fn enqueue_delete(
        entries: &mut Vec<Operation>,
        op: Operation,
        coalescing: DeleteCoalescing,
    ) -> EnqueueOutcome {
        let op_id = op.op_id();
        if entries.iter().any(|e| e.op_id() == op_id) {
            return EnqueueOutcome::Replaced;
        }

        if coalescing == DeleteCoalescing::Preserve {
            entries.push(op);
            return EnqueueOutcome::Appended;
        }

        let had_create = entries
            .iter()
            .any(|e| e.entity_id == op.entity_id && e.kind == OperationKind::Create);
        let before = entries.len();
        entries.retain(|e| e.entity_id != op.entity_id);
        let removed = before - entries.len();

        match coalescing {
            DeleteCoalescing::Collapse if had_create => EnqueueOutcome::Collapsed { removed },
            _ if removed == 0 => {
                entries.push(op);
                EnqueueOutcome::Appended
            }
            _ => {
                entries.push(op);
                EnqueueOutcome::Superseded { removed }
            }
        }
    }

    /// Devuelve a la queue una operación cuyo envío directo falló mientras
    /// se encolaban intents más recientes de la misma entidad. Entra delante
    /// de ellos; si uno ya la reemplaza o la anula, se descarta
    pub fn requeue(&self, op: Operation) -> Result<bool, StorageError> {
        let op_id = op.op_id();
        let kept = {
            let mut entries = self.entries.borrow_mut();
            let superseded = entries.iter().any(|e| {
                e.op_id() == op_id
                    || (op.kind == OperationKind::Update
                        && e.entity_id == op.entity_id
                        && e.kind == OperationKind::Delete)
            });
            if superseded {
                false
            } else {
                match entries.iter().position(|e| e.entity_id == op.entity_id) {
                    Some(index) => entries.insert(index, op),
                    None => entries.push(op),
                }
                true
            }
        };

        if !kept {
            log::info!("⏭️ {} ya tiene un intent más reciente en la queue", op_id);
            return Ok(false);
        }
        log::info!("📝 Queue {}: devuelta tras fallo (total {})", op_id, self.len());
        self.flush()?;
        Ok(true)
    }

    /// Elimina la entrada tras confirmación del servidor
    pub fn dequeue_confirmed(&self, op_id: &OpId) -> Result<bool, StorageError> {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let before = entries.len();
            entries.retain(|e| &e.op_id() != op_id);
            before != entries.len()
        };
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Elimina la entrada solo si su payload sigue siendo el enviado.
    /// Si un intent más reciente lo reemplazó durante el envío, la entrada
    /// se queda para el siguiente pase
    pub fn settle(&self, sent: &Operation) -> Result<bool, StorageError> {
        let op_id = sent.op_id();
        let removed = {
            let mut entries = self.entries.borrow_mut();
            match entries.iter().position(|e| e.op_id() == op_id) {
                Some(index) if entries[index].payload == sent.payload => {
                    entries.remove(index);
                    true
                }
                Some(_) => {
                    log::info!("🔁 {} reemplazada durante el envío, se conserva", op_id);
                    false
                }
                None => false,
            }
        };
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Copia ordenada; se puede recorrer mientras se encolan nuevas operaciones
    pub fn snapshot(&self) -> Vec<Operation> {
        self.entries.borrow().clone()
    }

    /// Versión actual de una entrada (puede haber cambiado desde el snapshot)
    pub fn get(&self, op_id: &OpId) -> Option<Operation> {
        self.entries.borrow().iter().find(|e| &e.op_id() == op_id).cloned()
    }

    pub fn contains(&self, op_id: &OpId) -> bool {
        self.entries.borrow().iter().any(|e| &e.op_id() == op_id)
    }

    pub fn has_pending_for(&self, entity_id: &EntityId) -> bool {
        self.entries.borrow().iter().any(|e| &e.entity_id == entity_id)
    }

    /// Vacía la queue (acción explícita del usuario). Devuelve cuántas había
    pub fn purge(&self) -> Result<usize, StorageError> {
        let purged = std::mem::take(&mut *self.entries.borrow_mut()).len();
        self.failed_passes.set(0);
        *self.last_failure.borrow_mut() = None;
        log::warn!("🗑️ Queue purgada: {} operaciones descartadas", purged);
        self.flush()?;
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Un pase se detuvo por fallo transitorio o de autenticación
    pub fn record_failed_pass(&self, reason: impl Into<String>) -> Result<(), StorageError> {
        self.failed_passes.set(self.failed_passes.get() + 1);
        *self.last_failure.borrow_mut() = Some(reason.into());
        self.flush()
    }

    pub fn reset_failures(&self) -> Result<(), StorageError> {
        if self.failed_passes.get() == 0 {
            return Ok(());
        }
        self.failed_passes.set(0);
        *self.last_failure.borrow_mut() = None;
        self.flush()
    }

    pub fn failed_passes(&self) -> u32 {
        self.failed_passes.get()
    }

    pub fn last_failure(&self) -> Option<String> {
        self.last_failure.borrow().clone()
    }

    /// Escribe la queue completa en el almacenamiento
    pub fn flush(&self) -> Result<(), StorageError> {
        let persisted = PersistedQueue {
            version: STORAGE_FORMAT_VERSION,
            saved_at: Utc::now(),
            failed_passes: self.failed_passes.get(),
            last_failure: self.last_failure.borrow().clone(),
            operations: self.entries.borrow().clone(),
        };

        save_to_storage(self.store.as_ref(), &self.key, &persisted).map_err(|e| {
            log::error!("❌ Error guardando queue ({} operaciones): {}", persisted.operations.len(), e);
            e
        })
    }
}
