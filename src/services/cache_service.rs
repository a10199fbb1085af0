// ============================================================================
// LOCAL MIRROR - Copia local de la colección
// ============================================================================
// Fuente de la vista mientras no hay red. Las mutaciones son solo en memoria;
// el llamador decide cuándo persistir con `save()`.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, SyncError};
use crate::models::{Entity, EntityId, Operation, OperationKind};
use crate::utils::storage::{load_from_storage, save_to_storage, KeyValueStore};
use crate::utils::STORAGE_FORMAT_VERSION;

/// Formato persistido del mirror
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MirrorCache {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Solo se guardaron los campos mínimos por falta de espacio
    #[serde(default)]
    pub degraded: bool,
    pub entities: Vec<Entity>,
}

impl MirrorCache {
    pub fn new(entities: Vec<Entity>, degraded: bool) -> Self {
        Self {
            version: STORAGE_FORMAT_VERSION,
            saved_at: Utc::now(),
            degraded,
            entities,
        }
    }

    pub fn is_valid(&self) -> bool {
        if self.version != STORAGE_FORMAT_VERSION {
            log::info!("❌ Caché inválido: versión {} != {}", self.version, STORAGE_FORMAT_VERSION);
            return false;
        }
        true
    }
}

/// Cómo quedó guardado el mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Full,
    /// Cuota agotada: solo id + campos mínimos
    Degraded,
}

pub struct LocalMirror {
    store: Rc<dyn KeyValueStore>,
    key: String,
    minimal_fields: Vec<String>,
    entities: RefCell<Vec<Entity>>,
    degraded: Cell<bool>,
    /// Entidades cargadas de un guardado degradado: en memoria solo tienen
    /// los campos mínimos. Un guardado degradado de esta sesión no las
    /// trunca, las copias en memoria siguen completas
    truncated: RefCell<HashSet<EntityId>>,
}

impl LocalMirror {
    pub fn open(store: Rc<dyn KeyValueStore>, key: impl Into<String>, minimal_fields: Vec<String>) -> Self {
        let mirror = Self {
            store,
            key: key.into(),
            minimal_fields,
            entities: RefCell::new(Vec::new()),
            degraded: Cell::new(false),
            truncated: RefCell::new(HashSet::new()),
        };
        mirror.load();
        mirror
    }

    /// Recarga desde el almacenamiento. Un blob ilegible cuenta como caché
    /// vacío: el mirror se reconstruye con el siguiente refetch
    pub fn load(&self) -> usize {
        let cache = match load_from_storage::<MirrorCache>(self.store.as_ref(), &self.key) {
            Ok(Some(cache)) if cache.is_valid() => cache,
            Ok(Some(_)) => MirrorCache::new(Vec::new(), false),
            Ok(None) => {
                log::info!("📭 Sin caché local");
                MirrorCache::new(Vec::new(), false)
            }
            Err(e) => {
                log::warn!("⚠️ Caché local ilegible, se ignora: {}", e);
                MirrorCache::new(Vec::new(), false)
            }
        };

        let count = cache.entities.len();
        let entities = dedupe(cache.entities);
        *self.truncated.borrow_mut() = if cache.degraded {
            entities.iter().map(|e| e.id.clone()).collect()
        } else {
            HashSet::new()
        };
        *self.entities.borrow_mut() = entities;
        self.degraded.set(cache.degraded);
        log::info!("✅ Caché local cargado: {} entidades{}", count, if cache.degraded { " (degradado)" } else { "" });
        count
    }

    /// Persiste el mirror completo; si no cabe, solo los campos mínimos
    pub fn save(&self) -> Result<SaveMode, SyncError> {
        let entities = self.entities.borrow().clone();

        match save_to_storage(self.store.as_ref(), &self.key, &MirrorCache::new(entities.clone(), false)) {
            Ok(()) => {
                if self.degraded.replace(false) {
                    log::info!("✅ Caché local completo de nuevo");
                }
                log::debug!("💾 Caché guardado: {} entidades", entities.len());
                Ok(SaveMode::Full)
            }
            Err(StorageError::QuotaExceeded) => {
                log::warn!("⚠️ Cuota de almacenamiento agotada, guardando solo campos mínimos");
                let minimal: Vec<Entity> = entities
                    .iter()
                    .map(|e| e.minimal(&self.minimal_fields))
                    .collect();

                match save_to_storage(self.store.as_ref(), &self.key, &MirrorCache::new(minimal, true)) {
                    Ok(()) => {
                        self.degraded.set(true);
                        Ok(SaveMode::Degraded)
                    }
                    Err(StorageError::QuotaExceeded) => {
                        log::error!("❌ Ni los campos mínimos caben en el almacenamiento");
                        Err(SyncError::LocalStorageExhausted)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                log::error!("❌ Error guardando caché: {}", e);
                Err(e.into())
            }
        }
    }

    /// Reemplaza la colección entera (refetch autoritativo)
    pub fn replace(&self, entities: Vec<Entity>) -> usize {
        let entities = dedupe(entities);
        let count = entities.len();
        *self.entities.borrow_mut() = entities;
        self.truncated.borrow_mut().clear();
        count
    }

    /// Aplica una operación a la vista local antes de la confirmación.
    /// Devuelve la copia previa de la entidad para poder deshacer
    pub fn apply_optimistic(&self, op: &Operation) -> Option<Entity> {
        let mut entities = self.entities.borrow_mut();
        let position = entities.iter().position(|e| e.id == op.entity_id);
        let previous = position.map(|i| entities[i].clone());

        match (op.kind, position) {
            (OperationKind::Create, Some(i)) | (OperationKind::Update, Some(i)) => {
                if let Some(payload) = &op.payload {
                    entities[i].apply_fields(payload);
                }
            }
            (OperationKind::Create, None) => entities.push(op.as_entity()),
            // La entidad ya no existe en local: la queue resolverá el Update
            (OperationKind::Update, None) => {}
            (OperationKind::Delete, Some(i)) => {
                entities.remove(i);
            }
            (OperationKind::Delete, None) => {}
        }

        previous
    }

    /// Vuelve a dejar la entidad como estaba antes de un intent rechazado
    pub fn restore(&self, id: &EntityId, previous: Option<Entity>) {
        let mut entities = self.entities.borrow_mut();
        let position = entities.iter().position(|e| &e.id == id);
        match (previous, position) {
            (Some(entity), Some(i)) => entities[i] = entity,
            (Some(entity), None) => entities.push(entity),
            (None, Some(i)) => {
                entities.remove(i);
            }
            (None, None) => {}
        }
    }

    /// Sustituye la copia local por la respuesta del servidor
    pub fn merge_confirmed(&self, entity: Entity) {
        self.truncated.borrow_mut().remove(&entity.id);
        let mut entities = self.entities.borrow_mut();
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => *existing = entity,
            None => entities.push(entity),
        }
    }

    pub fn remove(&self, id: &EntityId) -> Option<Entity> {
        self.truncated.borrow_mut().remove(id);
        let mut entities = self.entities.borrow_mut();
        let position = entities.iter().position(|e| &e.id == id)?;
        Some(entities.remove(position))
    }

    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.entities.borrow().iter().find(|e| &e.id == id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.borrow().iter().any(|e| &e.id == id)
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.entities.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.get()
    }

    /// La copia en memoria viene de un guardado degradado y le faltan campos
    pub fn is_truncated(&self, id: &EntityId) -> bool {
        self.truncated.borrow().contains(id)
    }

    pub fn minimal_fields(&self) -> &[String] {
        &self.minimal_fields
    }
}

/// Conserva la primera aparición de cada id
fn dedupe(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    let before = entities.len();
    let unique: Vec<Entity> = entities
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    if unique.len() != before {
        log::warn!("⚠️ {} entidades duplicadas eliminadas", before - unique.len());
    }
    unique
}
