//! How far up the context chain an operation commits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Save depth of an operation.
///
/// The scratch context is always saved. The depth counts the ancestor levels
/// saved after it: the target is level 1, its parent level 2, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveDepth {
    /// Only save the scratch context into the target
    ScratchOnly,
    /// Save the scratch context, then the target context
    ScratchAndTarget,
    /// Save every level up to and including the root
    ToRoot,
}

impl SaveDepth {
    /// Number of ancestor levels the chain walk may save.
    pub fn ancestor_levels(self) -> u32 {
        match self {
            SaveDepth::ScratchOnly => 0,
            SaveDepth::ScratchAndTarget => 1,
            SaveDepth::ToRoot => 100,
        }
    }
}

impl Default for SaveDepth {
    fn default() -> Self {
        SaveDepth::ScratchAndTarget
    }
}

impl fmt::Display for SaveDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveDepth::ScratchOnly => write!(f, "scratch-only"),
            SaveDepth::ScratchAndTarget => write!(f, "scratch-and-target"),
            SaveDepth::ToRoot => write!(f, "to-root"),
        }
    }
}

/// Error returned when parsing an unknown save depth.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown save depth `{0}` (expected scratch-only, scratch-and-target or to-root)")]
pub struct ParseSaveDepthError(pub String);

impl std::str::FromStr for SaveDepth {
    type Err = ParseSaveDepthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scratch-only" | "scratch" | "0" => Ok(SaveDepth::ScratchOnly),
            "scratch-and-target" | "target" | "1" => Ok(SaveDepth::ScratchAndTarget),
            "to-root" | "root" => Ok(SaveDepth::ToRoot),
            _ => Err(ParseSaveDepthError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depths_are_ordered() {
        assert!(SaveDepth::ScratchOnly < SaveDepth::ScratchAndTarget);
        assert!(SaveDepth::ScratchAndTarget < SaveDepth::ToRoot);
        assert_eq!(SaveDepth::ScratchOnly.ancestor_levels(), 0);
        assert_eq!(SaveDepth::ScratchAndTarget.ancestor_levels(), 1);
        assert_eq!(SaveDepth::ToRoot.ancestor_levels(), 100);
    }

    #[test]
    fn test_parse_save_depth() {
        assert_eq!("to-root".parse::<SaveDepth>(), Ok(SaveDepth::ToRoot));
        assert_eq!("Scratch-Only".parse::<SaveDepth>(), Ok(SaveDepth::ScratchOnly));
        assert!("everywhere".parse::<SaveDepth>().is_err());
    }

    #[test]
    fn test_save_depth_serde_uses_display_names() {
        let json = serde_json::to_string(&SaveDepth::ScratchAndTarget).unwrap();
        assert_eq!(json, "\"scratch-and-target\"");
        let back: SaveDepth = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SaveDepth::ScratchAndTarget);
    }
}
