//! Remote record types as the engine sees them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of a remote record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Bookkeeping fields the engine reads and patches on remote records.
///
/// Adapters map these onto their own property names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Path,
    LastSynced,
    Tags,
    Status,
    Canvas,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Date(NaiveDate),
    Tags(Vec<String>),
    Status(String),
    Flag(bool),
}

pub type PropertyMap = BTreeMap<Field, PropertyValue>;

/// A record of the remote tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNode {
    pub id: NodeId,
    pub title: String,
    /// Single parent; `None` for roots
    pub parent: Option<NodeId>,
    pub created_time: DateTime<Utc>,
    pub last_edited: DateTime<Utc>,
    /// Link back to the record in the remote UI
    pub url: Option<String>,
    pub properties: PropertyMap,
    /// Archived or trashed records count as deleted
    pub archived: bool,
}

impl RemoteNode {
    /// Whether the side-artifact flag is set
    pub fn canvas_enabled(&self) -> bool {
        matches!(self.properties.get(&Field::Canvas), Some(PropertyValue::Flag(true)))
    }

    /// Tags stored on the record, empty if unset
    pub fn tags(&self) -> &[String] {
        match self.properties.get(&Field::Tags) {
            Some(PropertyValue::Tags(tags)) => tags,
            _ => &[],
        }
    }
}

/// Payload for creating a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNode {
    pub title: String,
    pub parent: Option<NodeId>,
    pub properties: PropertyMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(properties: PropertyMap) -> RemoteNode {
        RemoteNode {
            id: NodeId::new("n"),
            title: "N".into(),
            parent: None,
            created_time: DateTime::<Utc>::UNIX_EPOCH,
            last_edited: DateTime::<Utc>::UNIX_EPOCH,
            url: None,
            properties,
            archived: false,
        }
    }

    #[test]
    fn test_canvas_flag() {
        assert!(!node(PropertyMap::new()).canvas_enabled());

        let mut props = PropertyMap::new();
        props.insert(Field::Canvas, PropertyValue::Flag(true));
        assert!(node(props).canvas_enabled());
    }

    #[test]
    fn test_node_id_serializes_as_string() {
        let id = NodeId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
