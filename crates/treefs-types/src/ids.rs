//! Typed identifiers for volumes, nodes, and clusters.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique). They are the
//! persisted keys of their records and display as standard UUID text for
//! logging. `Debug` uses the short form (first 8 hex chars).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A volume (file system) identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(uuid::Uuid);

/// A node (directory or file) identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(uuid::Uuid);

/// A cluster identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for human display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(VolumeId, "VolumeId");
impl_typed_id!(NodeId, "NodeId");
impl_typed_id!(ClusterId, "ClusterId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unique() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_8_chars() {
        assert_eq!(VolumeId::new().short().len(), 8);
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        let id = ClusterId::new();
        let simple = id.0.as_simple().to_string();
        assert_eq!(ClusterId::parse(&simple).unwrap(), id);
        assert_eq!(id.to_string().parse::<ClusterId>().unwrap(), id);
    }

    #[test]
    fn test_debug_uses_short_form() {
        let id = NodeId::new();
        assert_eq!(format!("{id:?}"), format!("NodeId({})", id.short()));
    }

    #[test]
    fn test_ordering_is_time_ordered() {
        let ids: Vec<NodeId> = (0..10).map(|_| NodeId::new()).collect();
        for i in 1..ids.len() {
            assert!(ids[i] >= ids[i - 1]);
        }
    }
}
