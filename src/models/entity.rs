use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Campos editables de una entidad (objeto JSON plano)
pub type Fields = serde_json::Map<String, Value>;

/// Identificador permanente de una entidad, asignado en el cliente
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Genera un id aleatorio de 128 bits (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// El backend puede devolver ids numéricos (autoincrement); se normalizan a string
impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => EntityId(s),
            RawId::Number(n) => EntityId(n.to_string()),
        })
    }
}

/// Registro sincronizado (un post del feed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Pista de revisión opaca del servidor; nunca se compara
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub revision_hint: Option<Value>,

    #[serde(flatten)]
    pub fields: Fields,
}

impl Entity {
    pub fn new(id: EntityId, fields: Fields) -> Self {
        Self {
            id,
            revision_hint: None,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Texto de un campo, vacío si no existe o no es string
    pub fn text(&self, name: &str) -> &str {
        self.fields.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Mezcla los campos dados sobre los actuales (los demás se conservan)
    pub fn apply_fields(&mut self, fields: &Fields) {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Compara solo las claves presentes en la copia local: los campos que
    /// el servidor deriva (createdAt, userId...) no cuentan como divergencia
    pub fn same_content_as(&self, server: &Entity) -> bool {
        self.fields
            .iter()
            .all(|(key, value)| server.fields.get(key) == Some(value))
    }

    /// Copia reducida a los campos indicados (persistencia degradada)
    pub fn minimal(&self, keep: &[String]) -> Entity {
        let fields = self
            .fields
            .iter()
            .filter(|(key, _)| keep.iter().any(|k| k == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Entity {
            id: self.id.clone(),
            revision_hint: None,
            fields,
        }
    }
}
