// ============================================================================
// FEED QUERY - Búsqueda, orden y estadísticas sobre el mirror
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::models::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" | "ascending" => Some(SortOrder::Ascending),
            "desc" | "descending" => Some(SortOrder::Descending),
            _ => None,
        }
    }
}

/// Longitud de la descripción en palabras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionLength {
    /// Menos de 5 palabras
    Short,
    /// De 5 a 20 palabras
    Medium,
    /// Más de 20 palabras
    Long,
}

impl DescriptionLength {
    pub fn classify(text: &str) -> Self {
        match text.split_whitespace().count() {
            n if n < 5 => DescriptionLength::Short,
            n if n <= 20 => DescriptionLength::Medium,
            _ => DescriptionLength::Long,
        }
    }
}

/// Filtro de la vista: texto a buscar y orden opcional
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub field: String,
    pub search: String,
    pub order: Option<SortOrder>,
}

impl FeedQuery {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            search: String::new(),
            order: None,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if self.search.is_empty() {
            return true;
        }
        entity
            .text(&self.field)
            .to_lowercase()
            .contains(&self.search.to_lowercase())
    }

    /// Sin orden, se conserva el orden del mirror
    pub fn apply(&self, entities: &[Entity]) -> Vec<Entity> {
        let mut result: Vec<Entity> = entities
            .iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();

        if let Some(order) = self.order {
            result.sort_by(|a, b| {
                let ordering = a.text(&self.field).cmp(b.text(&self.field));
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }
        result
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStatistics {
    pub total: usize,
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

impl FeedStatistics {
    pub fn from_entities(entities: &[Entity], field: &str) -> Self {
        entities.iter().fold(
            FeedStatistics {
                total: entities.len(),
                ..FeedStatistics::default()
            },
            |mut stats, entity| {
                match DescriptionLength::classify(entity.text(field)) {
                    DescriptionLength::Short => stats.short += 1,
                    DescriptionLength::Medium => stats.medium += 1,
                    DescriptionLength::Long => stats.long += 1,
                }
                stats
            },
        )
    }
}
