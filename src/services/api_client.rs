// ============================================================================
// API CLIENT - SOLO COMUNICACIÓN HTTP (Stateless)
// ============================================================================
// NO tiene lógica de negocio: traduce el contrato CRUD del backend a
// `Result<_, ApiError>`. Los timeouts los aplican los llamadores.
// ============================================================================

use std::rc::Rc;

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::models::{Entity, EntityId, Fields};
use crate::utils::storage::KeyValueStore;
use crate::utils::TOKEN_KEY;

/// Contrato del backend CRUD consumido por el subsistema offline
#[async_trait(?Send)]
pub trait EntityApi {
    /// `GET {collection}`: colección autoritativa completa
    async fn list(&self) -> Result<Vec<Entity>, ApiError>;

    /// `GET {collection}/{id}`: `None` si el servidor responde 404
    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, ApiError>;

    /// `POST {collection}`: con id duplicado el servidor devuelve el existente
    async fn create(&self, entity: &Entity) -> Result<Entity, ApiError>;

    /// `PUT {collection}/{id}`: `NotFound` si ya no existe
    async fn update(&self, id: &EntityId, fields: &Fields) -> Result<Entity, ApiError>;

    /// `DELETE {collection}/{id}`: `NotFound` si ya no existe
    async fn delete(&self, id: &EntityId) -> Result<(), ApiError>;

    /// Probe de liveness: cualquier 2xx cuenta
    async fn health(&self) -> Result<(), ApiError>;
}

/// Proveedor de la credencial bearer (subsistema de autenticación)
pub trait CredentialProvider {
    fn bearer_token(&self) -> Option<String>;

    /// El servidor respondió 401: la credencial ya no sirve
    fn invalidate(&self);
}

/// Token guardado por el login en el almacenamiento local
pub struct StoredCredentials {
    store: Rc<dyn KeyValueStore>,
}

impl StoredCredentials {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl CredentialProvider for StoredCredentials {
    fn bearer_token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                log::warn!("⚠️ No se pudo leer el token: {}", e);
                None
            }
        }
    }

    fn invalidate(&self) {
        if let Err(e) = self.store.remove(TOKEN_KEY) {
            log::error!("❌ Error eliminando token caducado: {}", e);
        }
        log::warn!("🔐 Sesión expirada: token eliminado");
    }
}

/// Cliente API - SOLO comunicación HTTP
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    collection_path: String,
    health_path: String,
    http: reqwest::Client,
    credentials: Option<Rc<dyn CredentialProvider>>,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            base_url: config.backend_url().trim_end_matches('/').to_string(),
            collection_path: config.collection_path.clone(),
            health_path: config.health_path.clone(),
            http: reqwest::Client::new(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Rc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn collection_url(&self) -> String {
        format!("{}{}", self.base_url, self.collection_path)
    }

    fn entity_url(&self, id: &EntityId) -> String {
        format!("{}{}/{}", self.base_url, self.collection_path, id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.as_ref().and_then(|c| c.bearer_token()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == 401 {
            if let Some(credentials) = &self.credentials {
                credentials.invalidate();
            }
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), error_message(&body)))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// El backend responde `{ "error": "..." }`; si no, se usa el texto tal cual
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                "Something went wrong".to_string()
            } else {
                body.to_string()
            }
        })
}

#[async_trait(?Send)]
impl EntityApi for ApiClient {
    async fn list(&self) -> Result<Vec<Entity>, ApiError> {
        let response = self.send(self.http.get(self.collection_url())).await?;
        let entities: Vec<Entity> = Self::read_json(response).await?;
        log::info!("📥 Colección obtenida: {} entidades", entities.len());
        Ok(entities)
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, ApiError> {
        match self.send(self.http.get(self.entity_url(id))).await {
            Ok(response) => Self::read_json(response).await.map(Some),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, entity: &Entity) -> Result<Entity, ApiError> {
        log::info!("📤 POST {} ({})", self.collection_path, entity.id);
        let response = self
            .send(self.http.post(self.collection_url()).json(entity))
            .await?;
        Self::read_json(response).await
    }

    async fn update(&self, id: &EntityId, fields: &Fields) -> Result<Entity, ApiError> {
        log::info!("📤 PUT {}/{}", self.collection_path, id);
        let response = self
            .send(self.http.put(self.entity_url(id)).json(fields))
            .await?;
        Self::read_json(response).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
        log::info!("📤 DELETE {}/{}", self.collection_path, id);
        self.send(self.http.delete(self.entity_url(id))).await?;
        Ok(())
    }

    async fn health(&self) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, self.health_path);
        self.send(self.http.get(url).header(CACHE_CONTROL, "no-cache"))
            .await?;
        Ok(())
    }
}
