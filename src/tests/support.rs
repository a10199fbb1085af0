use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::models::{Entity, EntityId, Fields};
use crate::services::api_client::EntityApi;
use crate::services::cache_service::LocalMirror;
use crate::utils::storage::{KeyValueStore, MemoryStore};
use crate::utils::MIRROR_KEY;
use crate::viewmodels::OfflineFeed;

// ============== FakeServer ==============
// Backend CRUD en memoria. Registra cada petición como "MÉTODO id"
// ("POST p1", "PUT p1", "DELETE p1", "GET p1", "GET /posts", "HEALTH").

#[derive(Default)]
pub(crate) struct FakeServer {
    entities: RefCell<Vec<Entity>>,
    requests: RefCell<Vec<String>>,
    down: Cell<bool>,
    hang: Cell<bool>,
    failures: RefCell<HashMap<String, ApiError>>,
    garbled: RefCell<HashSet<String>>,
    revision: Cell<u64>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: Vec<Entity>) -> Self {
        let server = Self::new();
        *server.entities.borrow_mut() = entities;
        server
    }

    /// Conexión rechazada en todas las peticiones
    pub fn set_down(&self, down: bool) {
        self.down.set(down);
    }

    /// Ninguna petición responde nunca
    pub fn set_hang(&self, hang: bool) {
        self.hang.set(hang);
    }

    /// La petición `request` ("PUT p1") falla con `error` hasta `clear_failure`
    pub fn fail(&self, request: &str, error: ApiError) {
        self.failures.borrow_mut().insert(request.to_string(), error);
    }

    pub fn clear_failure(&self, request: &str) {
        self.failures.borrow_mut().remove(request);
    }

    /// La petición `request` se aplica, pero la respuesta no se puede leer
    pub fn garble_response(&self, request: &str) {
        self.garbled.borrow_mut().insert(request.to_string());
    }

    fn respond(&self, request: &str, entity: Entity) -> Result<Entity, ApiError> {
        if self.garbled.borrow().contains(request) {
            return Err(ApiError::Decode("expected value at line 1 column 1".to_string()));
        }
        Ok(entity)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Solo POST, PUT y DELETE
    pub fn mutations(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.starts_with("POST") || r.starts_with("PUT") || r.starts_with("DELETE"))
            .cloned()
            .collect()
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.borrow().iter().find(|e| e.id.as_str() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    /// Alta o edición hecha por otro cliente
    pub fn put(&self, entity: Entity) {
        let mut entities = self.entities.borrow_mut();
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => *existing = entity,
            None => entities.push(entity),
        }
    }

    /// Borrado hecho por otro cliente
    pub fn remove(&self, id: &str) {
        self.entities.borrow_mut().retain(|e| e.id.as_str() != id);
    }

    async fn call(&self, request: String, mutates: bool) -> Result<(), ApiError> {
        self.requests.borrow_mut().push(request.clone());
        if self.hang.get() {
            futures::future::pending::<()>().await;
        }
        if mutates {
            // Punto de suspensión: deja avanzar a otras tareas a mitad de petición
            tokio::task::yield_now().await;
        }
        if self.down.get() {
            return Err(ApiError::Network("connection refused".to_string()));
        }
        match self.failures.borrow().get(&request) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn next_revision(&self) -> Value {
        self.revision.set(self.revision.get() + 1);
        json!(self.revision.get())
    }
}

#[async_trait(?Send)]
impl EntityApi for FakeServer {
    async fn list(&self) -> Result<Vec<Entity>, ApiError> {
        self.call("GET /posts".to_string(), false).await?;
        Ok(self.entities.borrow().clone())
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, ApiError> {
        self.call(format!("GET {}", id), false).await?;
        Ok(self.entity(id.as_str()))
    }

    async fn create(&self, entity: &Entity) -> Result<Entity, ApiError> {
        let request = format!("POST {}", entity.id);
        self.call(request.clone(), true).await?;
        if let Some(existing) = self.entity(entity.id.as_str()) {
            return self.respond(&request, existing);
        }
        let mut created = entity.clone();
        created.fields.insert("createdAt".to_string(), json!("2024-05-01T00:00:00Z"));
        created.revision_hint = Some(self.next_revision());
        self.entities.borrow_mut().push(created.clone());
        self.respond(&request, created)
    }

    async fn update(&self, id: &EntityId, fields: &Fields) -> Result<Entity, ApiError> {
        let request = format!("PUT {}", id);
        self.call(request.clone(), true).await?;
        let revision = self.next_revision();
        let updated = {
            let mut entities = self.entities.borrow_mut();
            let existing = entities
                .iter_mut()
                .find(|e| &e.id == id)
                .ok_or(ApiError::NotFound)?;
            existing.apply_fields(fields);
            existing.revision_hint = Some(revision);
            existing.clone()
        };
        self.respond(&request, updated)
    }

    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
        self.call(format!("DELETE {}", id), true).await?;
        let mut entities = self.entities.borrow_mut();
        let before = entities.len();
        entities.retain(|e| &e.id != id);
        if entities.len() == before {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), ApiError> {
        self.call("HEALTH".to_string(), false).await
    }
}

// ============== Helpers ==============

pub(crate) fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn post(id: &str, text: &str) -> Entity {
    Entity::new(id.into(), fields(json!({ "text": text, "date": "2024-05-01" })))
}

pub(crate) fn test_config() -> SyncConfig {
    SyncConfig {
        storage_namespace: "test".to_string(),
        ..SyncConfig::default()
    }
}

/// Feed sobre `store` y `server`. `online` = enlace activo y probe correcto
pub(crate) fn open_feed(
    config: SyncConfig,
    store: &MemoryStore,
    server: &Rc<FakeServer>,
    online: bool,
) -> Rc<OfflineFeed> {
    let api: Rc<dyn EntityApi> = server.clone();
    open_feed_with_api(config, store, api, online)
}

/// Como `open_feed`, con un backend que envuelve al `FakeServer`
pub(crate) fn open_feed_with_api(
    config: SyncConfig,
    store: &MemoryStore,
    api: Rc<dyn EntityApi>,
    online: bool,
) -> Rc<OfflineFeed> {
    let store: Rc<dyn KeyValueStore> = Rc::new(store.clone());
    let feed = OfflineFeed::open(config, store, api, online);
    if online {
        feed.monitor().record_probe(true);
    }
    feed
}

/// Deja en `store` un mirror guardado por una sesión anterior
pub(crate) fn seed_mirror(config: &SyncConfig, store: &MemoryStore, entities: Vec<Entity>) {
    let mirror = LocalMirror::open(
        Rc::new(store.clone()),
        config.storage_key(MIRROR_KEY),
        config.minimal_fields(),
    );
    mirror.replace(entities);
    mirror.save().unwrap();
}
