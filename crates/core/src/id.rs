//! Unique identifiers for ctxop entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a context operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Ulid);

impl OperationId {
    /// Generate a new OperationId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op_{}", self.0)
    }
}

impl std::str::FromStr for OperationId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim_start_matches("op_").parse()?))
    }
}

/// Unique identifier for a transactional context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Ulid);

impl ContextId {
    /// Generate a new ContextId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx_{}", self.0)
    }
}

/// Identity of a record.
///
/// Records are born with a temporary id in the context that inserts them.
/// A permanent id is a per-entity key issued by the backing store; once an
/// object has one it never changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectId {
    /// Context-local id, not yet known to any store
    Temporary {
        /// Random identity
        ulid: Ulid,
    },
    /// Store-issued id
    Permanent {
        /// Entity name
        entity: String,
        /// Store key, unique per entity
        key: u64,
    },
}

impl ObjectId {
    /// Generate a new temporary id
    pub fn temporary() -> Self {
        Self::Temporary { ulid: Ulid::new() }
    }

    /// Build a permanent id
    pub fn permanent(entity: impl Into<String>, key: u64) -> Self {
        Self::Permanent {
            entity: entity.into(),
            key,
        }
    }

    /// Whether this id still needs a permanent replacement.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary { .. })
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Temporary { ulid } => write!(f, "t{}", ulid),
            Self::Permanent { entity, key } => write!(f, "{}/p{}", entity, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_roundtrips_through_display() {
        let id = OperationId::new();
        let parsed: OperationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_object_id_kinds() {
        assert!(ObjectId::temporary().is_temporary());
        let id = ObjectId::permanent("Employee", 3);
        assert!(!id.is_temporary());
        assert_eq!(id.to_string(), "Employee/p3");
    }
}
