//! Seeds a remote tree from a JSON outline.
//!
//! ```json
//! {"trunk": [{"name": "Garden", "tags": ["project"],
//!             "branches": {"Beds": {"branches": {"Soil": {}}}}}]}
//! ```
//!
//! Resolved ids are written back into the outline, so seeding the same outline
//! twice creates nothing new.

use crate::error::Result;
use crate::node::{Field, NewNode, NodeId, PropertyMap, PropertyValue, RemoteNode};
use crate::options::SyncOptions;
use crate::remote::RemoteStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedPayload {
    pub trunk: Vec<SeedNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedNode {
    /// Title; for branches the map key is used instead
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub branches: BTreeMap<String, SeedNode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub created: usize,
    /// Nodes matched to an existing record
    pub reused: usize,
}

/// Create (or find) every record in the outline, filling in ids.
pub async fn seed<R: RemoteStore + ?Sized>(
    remote: &R,
    payload: &mut SeedPayload,
    options: &SyncOptions,
) -> Result<SeedReport> {
    let live_roots: Vec<RemoteNode> = remote
        .list_all(false)
        .await?
        .into_iter()
        .filter(|node| node.parent.is_none())
        .collect();

    let mut report = SeedReport::default();
    let mut pending: Vec<(&mut SeedNode, NodeId)> = Vec::new();

    for trunk in payload.trunk.iter_mut() {
        let id = match find_live(remote, trunk.id.as_deref()).await? {
            Some(node) => {
                report.reused += 1;
                node.id
            }
            None => match live_roots.iter().find(|root| root.title == trunk.name) {
                Some(root) => {
                    debug!("Matched trunk {} to existing root {}", trunk.name, root.id);
                    report.reused += 1;
                    root.id.clone()
                }
                None => {
                    report.created += 1;
                    create(remote, &trunk.name, None, &trunk.tags, options).await?
                }
            },
        };
        trunk.id = Some(id.to_string());
        pending.push((trunk, id));
    }

    // Branches, parents before children
    while let Some((node, parent)) = pending.pop() {
        for (name, branch) in node.branches.iter_mut() {
            let id = match find_live(remote, branch.id.as_deref()).await? {
                Some(existing) => {
                    report.reused += 1;
                    existing.id
                }
                None => {
                    report.created += 1;
                    create(remote, name, Some(&parent), &branch.tags, options).await?
                }
            };
            branch.id = Some(id.to_string());
            pending.push((branch, id));
        }
    }

    info!(
        "Seeded {} new records ({} already present)",
        report.created, report.reused
    );
    Ok(report)
}

/// The record behind a stored id, if it still exists and is not archived
async fn find_live<R: RemoteStore + ?Sized>(
    remote: &R,
    id: Option<&str>,
) -> Result<Option<RemoteNode>> {
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(remote
        .get_by_id(&NodeId::new(id))
        .await?
        .filter(|node| !node.archived))
}

async fn create<R: RemoteStore + ?Sized>(
    remote: &R,
    title: &str,
    parent: Option<&NodeId>,
    tags: &[String],
    options: &SyncOptions,
) -> Result<NodeId> {
    let mut properties = PropertyMap::new();
    properties.insert(Field::Status, PropertyValue::Status(options.status_new.clone()));
    if !tags.is_empty() {
        properties.insert(Field::Tags, PropertyValue::Tags(tags.to_vec()));
    }
    let created = remote
        .create(NewNode {
            title: title.to_string(),
            parent: parent.cloned(),
            properties,
        })
        .await?;
    debug!("Seeded {} as {}", title, created.id);
    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;

    fn payload() -> SeedPayload {
        serde_json::from_str(
            r#"{"trunk": [
                {"name": "Garden", "tags": ["project"],
                 "branches": {"Beds": {"branches": {"Soil": {}}}, "Tools": {}}},
                {"name": "Kitchen"}
            ]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_seed_builds_tree_and_writes_ids() {
        let remote = InMemoryRemote::new();
        let mut outline = payload();

        let report = seed(&remote, &mut outline, &SyncOptions::default()).await.unwrap();

        assert_eq!(report.created, 5);
        let garden_id = NodeId::new(outline.trunk[0].id.clone().unwrap());
        let beds = &outline.trunk[0].branches["Beds"];
        let beds_id = NodeId::new(beds.id.clone().unwrap());
        let soil_id = NodeId::new(beds.branches["Soil"].id.clone().unwrap());

        assert_eq!(remote.node(&beds_id).unwrap().parent, Some(garden_id.clone()));
        assert_eq!(remote.node(&soil_id).unwrap().parent, Some(beds_id));
        let garden = remote.node(&garden_id).unwrap();
        assert_eq!(
            garden.properties.get(&Field::Status),
            Some(&PropertyValue::Status("Not Synced".into()))
        );
        assert_eq!(garden.tags(), ["project".to_string()]);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent_with_written_back_ids() {
        let remote = InMemoryRemote::new();
        let mut outline = payload();
        seed(&remote, &mut outline, &SyncOptions::default()).await.unwrap();

        let report = seed(&remote, &mut outline, &SyncOptions::default()).await.unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.reused, 5);
        assert_eq!(remote.create_count(), 5);
    }

    #[tokio::test]
    async fn test_trunk_resolves_existing_root_by_title() {
        let remote = InMemoryRemote::new();
        let existing = remote.insert("Kitchen", None);
        let mut outline = payload();

        seed(&remote, &mut outline, &SyncOptions::default()).await.unwrap();

        assert_eq!(outline.trunk[1].id.as_deref(), Some(existing.as_str()));
    }

    #[tokio::test]
    async fn test_archived_trunk_id_is_recreated() {
        let remote = InMemoryRemote::new();
        let old = remote.insert("Kitchen", None);
        remote.archive(&old);
        let mut outline = SeedPayload {
            trunk: vec![SeedNode {
                name: "Kitchen".into(),
                id: Some(old.to_string()),
                ..Default::default()
            }],
        };

        let report = seed(&remote, &mut outline, &SyncOptions::default()).await.unwrap();

        assert_eq!(report.created, 1);
        assert_ne!(outline.trunk[0].id.as_deref(), Some(old.as_str()));
    }
}
