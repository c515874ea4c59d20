//! Operation defaults.

use crate::SaveDepth;
use serde::{Deserialize, Serialize};

/// Defaults applied when building a context operation.
///
/// This is passed explicitly to builders and queues; there is no global
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationDefaults {
    /// How far up the chain to save
    pub save_depth: SaveDepth,
    /// Obtain permanent ids for inserted objects before saving the scratch context
    pub obtain_permanent_ids: bool,
}

impl Default for OperationDefaults {
    fn default() -> Self {
        Self {
            save_depth: SaveDepth::ScratchAndTarget,
            obtain_permanent_ids: true,
        }
    }
}

impl OperationDefaults {
    /// Create the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set save depth.
    pub fn with_save_depth(mut self, depth: SaveDepth) -> Self {
        self.save_depth = depth;
        self
    }

    /// Set whether permanent ids are obtained.
    pub fn with_obtain_permanent_ids(mut self, obtain: bool) -> Self {
        self.obtain_permanent_ids = obtain;
        self
    }

    /// Parse defaults from JSON. Missing fields keep their default values.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = OperationDefaults::default();
        assert_eq!(defaults.save_depth, SaveDepth::ScratchAndTarget);
        assert!(defaults.obtain_permanent_ids);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let defaults = OperationDefaults::from_json(r#"{"save_depth":"to-root"}"#).unwrap();
        assert_eq!(defaults.save_depth, SaveDepth::ToRoot);
        assert!(defaults.obtain_permanent_ids);
    }
}
