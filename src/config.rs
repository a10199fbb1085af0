use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Intervalo mínimo entre probes al servidor
pub const MIN_PROBE_INTERVAL_SECONDS: u64 = 10;

/// Qué hacer con las operaciones pendientes cuando llega un Delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteCoalescing {
    /// Delete elimina Create/Update pendientes; si el Create nunca salió del
    /// cliente, el Delete también desaparece (no-op remoto)
    Collapse,
    /// Delete elimina Create/Update pendientes y se encola al final
    Supersede,
    /// Se envía todo en orden: Create/Update y luego Delete
    Preserve,
}

impl DeleteCoalescing {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "collapse" => Some(DeleteCoalescing::Collapse),
            "supersede" => Some(DeleteCoalescing::Supersede),
            "preserve" => Some(DeleteCoalescing::Preserve),
            _ => None,
        }
    }
}

impl Default for DeleteCoalescing {
    fn default() -> Self {
        DeleteCoalescing::Collapse
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub backend_url_development: String,
    pub backend_url_production: String,
    pub environment: String,
    pub enable_logging: bool,
    /// Colección CRUD (`GET/POST {collection_path}`, `PUT/DELETE {collection_path}/{id}`)
    pub collection_path: String,
    pub health_path: String,
    pub probe_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub storage_namespace: String,
    /// Campo de texto principal (búsqueda, orden, persistencia mínima)
    pub primary_field: String,
    pub timestamp_field: String,
    pub delete_coalescing: DeleteCoalescing,
    pub divergence_warn_threshold: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url_development: "http://localhost:5003".to_string(),
            backend_url_production: "https://mppxapp-production.up.railway.app".to_string(),
            environment: "development".to_string(),
            enable_logging: true,
            collection_path: "/posts".to_string(),
            health_path: "/".to_string(),
            probe_interval_seconds: 15,
            probe_timeout_seconds: 5,
            request_timeout_seconds: 30,
            storage_namespace: "offline_feed".to_string(),
            primary_field: "text".to_string(),
            timestamp_field: "date".to_string(),
            delete_coalescing: DeleteCoalescing::Collapse,
            divergence_warn_threshold: 200,
        }
    }
}

impl SyncConfig {
    /// Carga la configuración desde variables de entorno en tiempo de compilación
    /// (build.rs las toma de `.env` si existe)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            backend_url_development: option_env!("BACKEND_URL_DEVELOPMENT")
                .map(str::to_string)
                .unwrap_or(defaults.backend_url_development),
            backend_url_production: option_env!("BACKEND_URL_PRODUCTION")
                .map(str::to_string)
                .unwrap_or(defaults.backend_url_production),
            environment: option_env!("ENVIRONMENT")
                .map(str::to_string)
                .unwrap_or(defaults.environment),
            enable_logging: option_env!("ENABLE_LOGGING")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.enable_logging),
            collection_path: option_env!("COLLECTION_PATH")
                .map(str::to_string)
                .unwrap_or(defaults.collection_path),
            health_path: option_env!("HEALTH_PATH")
                .map(str::to_string)
                .unwrap_or(defaults.health_path),
            probe_interval_seconds: option_env!("PROBE_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.probe_interval_seconds),
            probe_timeout_seconds: option_env!("PROBE_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.probe_timeout_seconds),
            request_timeout_seconds: option_env!("REQUEST_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_seconds),
            storage_namespace: option_env!("STORAGE_NAMESPACE")
                .map(str::to_string)
                .unwrap_or(defaults.storage_namespace),
            primary_field: option_env!("PRIMARY_FIELD")
                .map(str::to_string)
                .unwrap_or(defaults.primary_field),
            timestamp_field: option_env!("TIMESTAMP_FIELD")
                .map(str::to_string)
                .unwrap_or(defaults.timestamp_field),
            delete_coalescing: option_env!("DELETE_COALESCING")
                .and_then(DeleteCoalescing::parse)
                .unwrap_or(defaults.delete_coalescing),
            divergence_warn_threshold: option_env!("DIVERGENCE_WARN_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.divergence_warn_threshold),
        }
    }

    /// URL del backend según el entorno actual
    pub fn backend_url(&self) -> &str {
        match self.environment.as_str() {
            "production" => &self.backend_url_production,
            _ => &self.backend_url_development,
        }
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.enable_logging
    }

    /// Nunca por debajo de 10 s para no saturar el backend
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds.max(MIN_PROBE_INTERVAL_SECONDS))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    /// Clave con namespace para el almacenamiento local (`offline_feed:queue`)
    pub fn storage_key(&self, name: &str) -> String {
        if self.storage_namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.storage_namespace, name)
        }
    }

    /// Campos que sobreviven a la persistencia degradada (además del id)
    pub fn minimal_fields(&self) -> Vec<String> {
        vec![self.primary_field.clone(), self.timestamp_field.clone()]
    }
}

// Configuración global estática
lazy_static::lazy_static! {
    pub static ref CONFIG: SyncConfig = SyncConfig::from_env();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_interval_is_clamped_to_minimum() {
        let config = SyncConfig {
            probe_interval_seconds: 2,
            ..SyncConfig::default()
        };
        assert_eq!(config.probe_interval(), Duration::from_secs(10));
        assert_eq!(SyncConfig::default().probe_interval(), Duration::from_secs(15));
    }

    #[test]
    fn storage_keys_are_namespaced() {
        let config = SyncConfig::default();
        assert_eq!(config.storage_key("queue"), "offline_feed:queue");

        let bare = SyncConfig {
            storage_namespace: String::new(),
            ..SyncConfig::default()
        };
        assert_eq!(bare.storage_key("mirror"), "mirror");
    }

    #[test]
    fn backend_url_follows_environment() {
        let mut config = SyncConfig::default();
        assert_eq!(config.backend_url(), "http://localhost:5003");
        config.environment = "production".to_string();
        assert_eq!(config.backend_url(), config.backend_url_production.as_str());
    }

    #[test]
    fn delete_coalescing_parses_case_insensitively() {
        assert_eq!(DeleteCoalescing::parse("Preserve"), Some(DeleteCoalescing::Preserve));
        assert_eq!(DeleteCoalescing::parse("nope"), None);
    }
}
