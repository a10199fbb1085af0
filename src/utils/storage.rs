// ============================================================================
// ALMACENAMIENTO LOCAL CLAVE/VALOR
// ============================================================================
// Cada blob (`mirror`, `queue`, `token`) se escribe entero en cada llamada.
// Backends: memoria (tests), ficheros (nativo) y localStorage (web.rs).
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

/// Almacenamiento durable de blobs de texto por clave
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Rc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

pub fn save_to_storage<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.set(key, &json)
}

/// `Ok(None)` si no hay nada guardado; `Corrupt` si el blob no se puede leer
pub fn load_from_storage<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

pub fn remove_from_storage(store: &dyn KeyValueStore, key: &str) -> Result<(), StorageError> {
    store.remove(key)
}

/// Almacenamiento en memoria compartible entre "procesos" simulados.
/// Los clones ven los mismos datos, lo que permite simular un reinicio.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
    quota_bytes: Rc<Cell<Option<usize>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simula el límite de cuota de localStorage
    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.set_quota(Some(quota_bytes));
        store
    }

    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        self.quota_bytes.set(quota_bytes);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes.get() {
            let needed = self.used_bytes_without(key) + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use file_store::FileStore;

#[cfg(not(target_arch = "wasm32"))]
mod file_store {
    use std::fs;
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};

    use super::KeyValueStore;
    use crate::error::StorageError;

    /// Un fichero por clave. La escritura va a un temporal y se renombra,
    /// así que un crash deja el blob anterior o el nuevo, nunca uno a medias.
    pub struct FileStore {
        dir: PathBuf,
    }

    impl FileStore {
        pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
            let dir = dir.as_ref().to_path_buf();
            fs::create_dir_all(&dir)?;
            Ok(Self { dir })
        }

        fn path_for(&self, key: &str) -> PathBuf {
            let name: String = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                .collect();
            self.dir.join(format!("{}.json", name))
        }
    }

    impl KeyValueStore for FileStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            match fs::read_to_string(self.path_for(key)) {
                Ok(contents) => Ok(Some(contents)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            let path = self.path_for(key);
            let tmp = path.with_extension("json.tmp");
            let write = || -> std::io::Result<()> {
                let mut file = fs::File::create(&tmp)?;
                file.write_all(value.as_bytes())?;
                file.sync_all()?;
                fs::rename(&tmp, &path)
            };
            write().map_err(|e| match e.raw_os_error() {
                // ENOSPC
                Some(28) => StorageError::QuotaExceeded,
                _ => e.into(),
            })
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            match fs::remove_file(self.path_for(key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").unwrap().as_deref(), Some("v"));
        other.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn memory_store_enforces_quota() {
        let store = MemoryStore::with_quota(10);
        assert_eq!(store.set("key", "0123456789"), Err(StorageError::QuotaExceeded));
        store.set("k", "small").unwrap();
        // Reemplazar una clave no cuenta su valor anterior
        store.set("k", "smaller").unwrap();
    }

    #[test]
    fn corrupt_blobs_are_reported_not_panicked() {
        let store = MemoryStore::new();
        store.set("queue", "{not json").unwrap();
        let loaded: Result<Option<Vec<String>>, _> = load_from_storage(&store, "queue");
        assert!(matches!(loaded, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn file_store_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("offline_feed:queue").unwrap(), None);

        save_to_storage(&store, "offline_feed:queue", &vec!["a", "b"]).unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        let loaded: Option<Vec<String>> = load_from_storage(&reopened, "offline_feed:queue").unwrap();
        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));

        remove_from_storage(&reopened, "offline_feed:queue").unwrap();
        assert_eq!(store.get("offline_feed:queue").unwrap(), None);
    }
}
