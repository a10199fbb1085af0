// ============================================================================
// WEB - Integración con el navegador (solo wasm32)
// ============================================================================
// localStorage como almacenamiento, eventos online/offline de `window` como
// señal de enlace y arranque del runtime (panic hook + logger).
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{window, DomException, Event, Storage};

use crate::config::{SyncConfig, CONFIG};
use crate::error::StorageError;
use crate::services::api_client::{ApiClient, StoredCredentials};
use crate::services::network_monitor::ConnectivityMonitor;
use crate::utils::runtime::spawn_local;
use crate::utils::storage::KeyValueStore;
use crate::viewmodels::OfflineFeed;

// Instancia global del feed (una por pestaña)
thread_local! {
    static FEED: RefCell<Option<Rc<OfflineFeed>>> = RefCell::new(None);
}

/// `window.localStorage`
pub struct LocalStorageStore {
    storage: Storage,
}

impl LocalStorageStore {
    pub fn open() -> Result<Self, StorageError> {
        let storage = window()
            .and_then(|w| w.local_storage().ok())
            .flatten()
            .ok_or_else(|| StorageError::Unavailable("No se pudo acceder a localStorage".to_string()))?;
        Ok(Self { storage })
    }
}

fn is_quota_error(error: &JsValue) -> bool {
    error
        .dyn_ref::<DomException>()
        .map(|e| e.name() == "QuotaExceededError" || e.code() == 22)
        .unwrap_or(false)
}

impl KeyValueStore for LocalStorageStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("Error leyendo localStorage: {:?}", e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage.set_item(key, value).map_err(|e| {
            if is_quota_error(&e) {
                StorageError::QuotaExceeded
            } else {
                StorageError::Unavailable(format!("Error guardando en localStorage: {:?}", e))
            }
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(format!("Error eliminando de localStorage: {:?}", e)))
    }
}

/// `navigator.onLine`; sin dato se asume enlace activo
pub fn navigator_on_line() -> bool {
    window()
        .and_then(|w| js_sys::Reflect::get(&w, &JsValue::from_str("navigator")).ok())
        .and_then(|nav| js_sys::Reflect::get(&nav, &JsValue::from_str("onLine")).ok())
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

/// Conecta los eventos `online`/`offline` de `window` con el monitor.
/// Los listeners viven lo mismo que la página
pub fn install_link_listeners(monitor: &Rc<ConnectivityMonitor>) {
    let window = match window() {
        Some(w) => w,
        None => return,
    };

    let online_closure = Closure::wrap(Box::new({
        let monitor = Rc::downgrade(monitor);
        move |_event: Event| {
            if let Some(monitor) = monitor.upgrade() {
                monitor.set_link_up(true);
            }
        }
    }) as Box<dyn FnMut(Event)>);

    let offline_closure = Closure::wrap(Box::new({
        let monitor = Rc::downgrade(monitor);
        move |_event: Event| {
            if let Some(monitor) = monitor.upgrade() {
                monitor.set_link_up(false);
            }
        }
    }) as Box<dyn FnMut(Event)>);

    if let Err(e) = window.add_event_listener_with_callback("online", online_closure.as_ref().unchecked_ref()) {
        log::error!("❌ Error registrando listener online: {:?}", e);
    }
    if let Err(e) = window.add_event_listener_with_callback("offline", offline_closure.as_ref().unchecked_ref()) {
        log::error!("❌ Error registrando listener offline: {:?}", e);
    }

    online_closure.forget();
    offline_closure.forget();

    log::info!("✅ Listeners online/offline registrados");
}

/// Monta el feed sobre localStorage y el backend configurado
pub fn launch(config: SyncConfig) -> Result<Rc<OfflineFeed>, StorageError> {
    let store: Rc<dyn KeyValueStore> = Rc::new(LocalStorageStore::open()?);
    let api = ApiClient::new(&config).with_credentials(Rc::new(StoredCredentials::new(store.clone())));

    let feed = OfflineFeed::open(config, store, Rc::new(api), navigator_on_line());
    install_link_listeners(feed.monitor());

    let starting = feed.clone();
    spawn_local(async move {
        starting.initial_load().await;
        starting.start();
    });

    FEED.with(|cell| *cell.borrow_mut() = Some(feed.clone()));
    Ok(feed)
}

/// Feed montado por `start`, si existe
pub fn current_feed() -> Option<Rc<OfflineFeed>> {
    FEED.with(|cell| cell.borrow().clone())
}

#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();

    let config = CONFIG.clone();
    if config.is_logging_enabled() {
        wasm_logger::init(wasm_logger::Config::default());
    }
    log::info!("🚀 Offline feed ({})", config.environment);

    launch(config).map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(())
}

/// Operaciones pendientes de subir (llamable desde JavaScript)
#[wasm_bindgen]
pub fn pending_changes() -> usize {
    current_feed().map(|feed| feed.pending_count()).unwrap_or(0)
}

/// Descarta los cambios pendientes (acción explícita del usuario)
#[wasm_bindgen]
pub fn purge_pending_changes() {
    if let Some(feed) = current_feed() {
        spawn_local(async move {
            match feed.purge_queue().await {
                Ok(purged) => log::info!("🗑️ {} cambios descartados", purged),
                Err(e) => log::error!("❌ Error purgando cambios: {}", e),
            }
        });
    }
}
