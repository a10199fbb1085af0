use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::{Entity, EntityId, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn method(&self) -> &'static str {
        match self {
            OperationKind::Create => "POST",
            OperationKind::Update => "PUT",
            OperationKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Identidad de una operación: (tipo, entidad). El tipo y el id determinan
/// la URL destino, así que dos intents equivalentes colapsan en la misma
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub kind: OperationKind,
    pub entity_id: EntityId,
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.entity_id)
    }
}

/// Mutación pendiente de confirmar por el servidor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub kind: OperationKind,
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Fields>,
    pub enqueued_at: DateTime<Utc>,
}

impl Operation {
    pub fn create(entity: &Entity) -> Self {
        Self {
            kind: OperationKind::Create,
            entity_id: entity.id.clone(),
            payload: Some(entity.fields.clone()),
            enqueued_at: Utc::now(),
        }
    }

    /// `fields` es el conjunto editable completo tras el cambio, no un parche
    pub fn update(entity_id: EntityId, fields: Fields) -> Self {
        Self {
            kind: OperationKind::Update,
            entity_id,
            payload: Some(fields),
            enqueued_at: Utc::now(),
        }
    }

    pub fn delete(entity_id: EntityId) -> Self {
        Self {
            kind: OperationKind::Delete,
            entity_id,
            payload: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn op_id(&self) -> OpId {
        OpId {
            kind: self.kind,
            entity_id: self.entity_id.clone(),
        }
    }

    /// Ruta relativa de la petición (`/posts` o `/posts/{id}`)
    pub fn target_path(&self, collection_path: &str) -> String {
        match self.kind {
            OperationKind::Create => collection_path.to_string(),
            OperationKind::Update | OperationKind::Delete => {
                format!("{}/{}", collection_path, self.entity_id)
            }
        }
    }

    /// Entidad que representa el payload (para Create y el overlay optimista)
    pub fn as_entity(&self) -> Entity {
        Entity::new(self.entity_id.clone(), self.payload.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_is_kind_and_entity() {
        let a = Operation::update("p1".into(), Fields::new());
        let b = Operation::update("p1".into(), Fields::new());
        let c = Operation::delete("p1".into());
        assert_eq!(a.op_id(), b.op_id());
        assert_ne!(a.op_id(), c.op_id());
        assert_eq!(c.op_id().to_string(), "delete:p1");
    }

    #[test]
    fn target_path_follows_kind() {
        let entity = Entity::new("p1".into(), Fields::new());
        assert_eq!(Operation::create(&entity).target_path("/posts"), "/posts");
        assert_eq!(Operation::delete("p1".into()).target_path("/posts"), "/posts/p1");
        assert_eq!(OperationKind::Update.method(), "PUT");
    }
}
