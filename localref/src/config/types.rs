use serde::{Deserialize, Serialize};

/// Store-wide settings shared by every entity opened through a `LocalStore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How `Collection::add` generates document ids
    #[serde(default)]
    pub id_strategy: IdStrategy,
    /// Upper bound on nested emissions. `None` leaves recursion unbounded.
    #[serde(default)]
    pub max_emit_depth: Option<usize>,
}

impl StoreConfig {
    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_max_emit_depth(mut self, limit: usize) -> Self {
        self.max_emit_depth = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Ulid,
    Nanoid,
}

impl IdStrategy {
    /// Generate a fresh collision-resistant id.
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique_v4() {
        let a = IdStrategy::Uuid.generate();
        let b = IdStrategy::Uuid.generate();
        assert_ne!(a, b);
        let parsed = uuid::Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_ulid_ids_are_lowercase() {
        let id = IdStrategy::Ulid.generate();
        assert_eq!(id.len(), 26);
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_nanoid_length() {
        assert_eq!(IdStrategy::Nanoid.generate().len(), 21);
    }

    #[test]
    fn test_builder_methods() {
        let config = StoreConfig::default()
            .with_id_strategy(IdStrategy::Ulid)
            .with_max_emit_depth(8);
        assert_eq!(config.id_strategy, IdStrategy::Ulid);
        assert_eq!(config.max_emit_depth, Some(8));
    }
}
