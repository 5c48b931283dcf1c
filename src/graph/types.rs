//! Identifier types for the embedded property graph
//!
//! `NodeId`/`EdgeId` are store-assigned slots and change across a snapshot
//! restore. The uid attribute on a node is the identity merges key on.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! slot_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                $name(id)
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                $name(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

slot_id!(
    /// Slot of a node in the store
    NodeId
);

slot_id!(
    /// Slot of an edge in the store
    EdgeId
);

name_type!(
    /// Node label, one of the registry's node kinds (`term`, `document`, ...)
    Label
);

name_type!(
    /// Relationship type (`tfidf`, `in_corpus`, ...)
    EdgeType
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display_and_order() {
        assert_eq!(format!("{}", NodeId::new(42)), "NodeId(42)");
        assert_eq!(format!("{}", EdgeId::new(7)), "EdgeId(7)");
        assert!(NodeId::new(1) < NodeId::new(2));
    }

    #[test]
    fn test_label_and_edge_type() {
        let label: Label = "term".into();
        assert_eq!(label.as_str(), "term");
        assert_eq!(EdgeType::new("tfidf").to_string(), "tfidf");
        assert_eq!(Label::from(String::from("document")), Label::new("document"));
    }
}
