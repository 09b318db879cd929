//! Remote store backed by a Notion database.
//!
//! Pages are records; a self-relation property holds the parent. Logical fields
//! map onto database properties through [`PropertyNames`].

use crate::config::{PropertyNames, RemoteConfig};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use hubsync_core::node::{Field, NewNode, NodeId, PropertyMap, PropertyValue, RemoteNode};
use hubsync_core::remote::{RemoteError, RemoteStore, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

pub const NOTION_API: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;

pub struct NotionRemote {
    client: Client,
    base_url: String,
    api_key: String,
    database_id: String,
    properties: PropertyNames,
    icon: Option<String>,
    cover: Option<String>,
}

impl NotionRemote {
    pub fn new(api_key: impl Into<String>, database_id: impl Into<String>, properties: PropertyNames) -> Self {
        Self {
            client: Client::new(),
            base_url: NOTION_API.to_string(),
            api_key: api_key.into(),
            database_id: database_id.into(),
            properties,
            icon: None,
            cover: None,
        }
    }

    pub fn from_config(remote: &RemoteConfig, api_key: impl Into<String>) -> Self {
        match remote {
            RemoteConfig::Notion {
                database_id,
                properties,
                icon,
                cover,
            } => {
                let mut store = Self::new(api_key, database_id.clone(), properties.clone());
                store.icon = icon.clone();
                store.cover = cover.clone();
                store
            }
        }
    }

    /// Point at a different API root, e.g. a local proxy
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Send a request; `None` when the API answers 404.
    async fn send(&self, request: RequestBuilder) -> Result<Option<Value>> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify(status, &body));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Run a database query, following cursors until every page is read.
    async fn query(&self, filter: Option<Value>) -> Result<Vec<RemoteNode>> {
        let url = format!("{}/databases/{}/query", self.base_url, self.database_id);
        let mut nodes = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(filter) = &filter {
                body["filter"] = filter.clone();
            }
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }

            let page = self
                .send(self.client.post(&url).json(&body))
                .await?
                .ok_or_else(|| RemoteError::Rejected(format!("database {} not found", self.database_id)))?;
            let results = page["results"]
                .as_array()
                .ok_or_else(|| RemoteError::Decode("query response has no results".to_string()))?;
            for result in results {
                nodes.push(decode_page(result, &self.properties)?);
            }

            cursor = page["next_cursor"].as_str().map(str::to_string);
            if !page["has_more"].as_bool().unwrap_or(false) || cursor.is_none() {
                break;
            }
        }

        debug!("Query returned {} pages", nodes.len());
        Ok(nodes)
    }
}

fn classify(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RemoteError::Transient(format!("{}: {}", status, message))
    } else {
        RemoteError::Rejected(format!("{}: {}", status, message))
    }
}

fn parse_time(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    let raw = value[field]
        .as_str()
        .ok_or_else(|| RemoteError::Decode(format!("page has no {}", field)))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RemoteError::Decode(format!("{} {:?}: {}", field, raw, e)))
}

fn plain_text(fragments: &Value) -> String {
    fragments
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["plain_text"].as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// Turn a page object into a record.
pub fn decode_page(page: &Value, names: &PropertyNames) -> Result<RemoteNode> {
    let id = page["id"]
        .as_str()
        .ok_or_else(|| RemoteError::Decode("page has no id".to_string()))?;
    let props = &page["properties"];

    // Fall back to whichever property is the title if the configured name is wrong
    let title = props
        .get(&names.title)
        .or_else(|| {
            props
                .as_object()
                .and_then(|all| all.values().find(|prop| prop["type"] == "title"))
        })
        .map(|prop| plain_text(&prop["title"]))
        .unwrap_or_default();

    let parent = props[&names.parent]["relation"]
        .as_array()
        .and_then(|relation| relation.first())
        .and_then(|first| first["id"].as_str())
        .map(NodeId::new);

    let mut properties = PropertyMap::new();
    let path = plain_text(&props[&names.path]["rich_text"]);
    if !path.is_empty() {
        properties.insert(Field::Path, PropertyValue::Text(path));
    }
    if let Some(start) = props[&names.last_synced]["date"]["start"].as_str() {
        let day = start.get(..10).unwrap_or(start);
        if let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            properties.insert(Field::LastSynced, PropertyValue::Date(date));
        }
    }
    if let Some(options) = props[&names.tags]["multi_select"].as_array() {
        let tags: Vec<String> = options
            .iter()
            .filter_map(|option| option["name"].as_str().map(str::to_string))
            .collect();
        properties.insert(Field::Tags, PropertyValue::Tags(tags));
    }
    let status_prop = &props[&names.status];
    if let Some(status) = status_prop["status"]["name"]
        .as_str()
        .or_else(|| status_prop["select"]["name"].as_str())
    {
        properties.insert(Field::Status, PropertyValue::Status(status.to_string()));
    }
    if let Some(flag) = props[&names.canvas]["checkbox"].as_bool() {
        properties.insert(Field::Canvas, PropertyValue::Flag(flag));
    }

    Ok(RemoteNode {
        id: NodeId::new(id),
        title,
        parent,
        created_time: parse_time(page, "created_time")?,
        last_edited: parse_time(page, "last_edited_time")?,
        url: page["url"].as_str().map(str::to_string),
        properties,
        archived: page["archived"].as_bool().unwrap_or(false)
            || page["in_trash"].as_bool().unwrap_or(false),
    })
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

/// Property payload for a set of logical fields.
pub fn encode_properties(properties: &PropertyMap, names: &PropertyNames) -> Map<String, Value> {
    let mut out = Map::new();
    for (field, value) in properties {
        let name = match field {
            Field::Path => &names.path,
            Field::LastSynced => &names.last_synced,
            Field::Tags => &names.tags,
            Field::Status => &names.status,
            Field::Canvas => &names.canvas,
        };
        let encoded = match value {
            PropertyValue::Text(text) => json!({ "rich_text": rich_text(text) }),
            PropertyValue::Date(date) => json!({ "date": { "start": date.to_string() } }),
            PropertyValue::Tags(tags) => {
                let options: Vec<Value> = tags.iter().map(|tag| json!({ "name": tag })).collect();
                json!({ "multi_select": options })
            }
            PropertyValue::Status(status) => json!({ "status": { "name": status } }),
            PropertyValue::Flag(flag) => json!({ "checkbox": flag }),
        };
        out.insert(name.clone(), encoded);
    }
    out
}

#[async_trait]
impl RemoteStore for NotionRemote {
    async fn list_all(&self, include_archived: bool) -> Result<Vec<RemoteNode>> {
        let nodes = self.query(None).await?;
        Ok(nodes
            .into_iter()
            .filter(|node| include_archived || !node.archived)
            .collect())
    }

    async fn list_modified_after(&self, ts: DateTime<Utc>) -> Result<Vec<RemoteNode>> {
        let filter = json!({
            "timestamp": "last_edited_time",
            "last_edited_time": { "after": ts.to_rfc3339() }
        });
        self.query(Some(filter)).await
    }

    async fn get_by_id(&self, id: &NodeId) -> Result<Option<RemoteNode>> {
        let url = format!("{}/pages/{}", self.base_url, id);
        match self.send(self.client.get(&url)).await? {
            Some(page) => decode_page(&page, &self.properties).map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, node: NewNode) -> Result<RemoteNode> {
        let mut properties = encode_properties(&node.properties, &self.properties);
        properties.insert(
            self.properties.title.clone(),
            json!({ "title": rich_text(&node.title) }),
        );
        if let Some(parent) = &node.parent {
            properties.insert(
                self.properties.parent.clone(),
                json!({ "relation": [{ "id": parent.as_str() }] }),
            );
        }

        let mut body = json!({
            "parent": { "database_id": self.database_id },
            "properties": properties,
        });
        if let Some(icon) = &self.icon {
            body["icon"] = json!({ "type": "emoji", "emoji": icon });
        }
        if let Some(cover) = &self.cover {
            body["cover"] = json!({ "type": "external", "external": { "url": cover } });
        }

        let url = format!("{}/pages", self.base_url);
        let page = self
            .send(self.client.post(&url).json(&body))
            .await?
            .ok_or_else(|| RemoteError::Rejected(format!("database {} not found", self.database_id)))?;
        let created = decode_page(&page, &self.properties)?;
        debug!("Created page {} ({})", created.id, created.title);
        Ok(created)
    }

    async fn patch_properties(&self, id: &NodeId, properties: PropertyMap) -> Result<()> {
        let url = format!("{}/pages/{}", self.base_url, id);
        let body = json!({ "properties": encode_properties(&properties, &self.properties) });
        match self.send(self.client.patch(&url).json(&body)).await? {
            Some(_) => Ok(()),
            None => {
                warn!("Page {} disappeared before it could be patched", id);
                Err(RemoteError::NotFound(id.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Value {
        json!({
            "object": "page",
            "id": "p-1",
            "created_time": "2024-05-01T10:00:00.000Z",
            "last_edited_time": "2024-05-02T11:30:00.000Z",
            "archived": false,
            "in_trash": false,
            "url": "https://www.notion.so/p1",
            "properties": {
                "Name": { "type": "title", "title": [
                    { "plain_text": "Raised " }, { "plain_text": "Beds" }
                ]},
                "Parent item": { "type": "relation", "relation": [{ "id": "p-0" }] },
                "Obsidian Path": { "type": "rich_text", "rich_text": [
                    { "plain_text": "Garden/Raised Beds/Raised Beds.md" }
                ]},
                "Last Synced": { "type": "date", "date": { "start": "2024-05-02" } },
                "Tags": { "type": "multi_select", "multi_select": [{ "name": "branch" }] },
                "Status": { "type": "status", "status": { "name": "Sync Complete" } },
                "Canvas": { "type": "checkbox", "checkbox": true }
            }
        })
    }

    #[test]
    fn test_decode_page() {
        let node = decode_page(&page(), &PropertyNames::default()).unwrap();

        assert_eq!(node.id, NodeId::new("p-1"));
        assert_eq!(node.title, "Raised Beds");
        assert_eq!(node.parent, Some(NodeId::new("p-0")));
        assert_eq!(node.url.as_deref(), Some("https://www.notion.so/p1"));
        assert!(node.canvas_enabled());
        assert_eq!(node.tags(), ["branch".to_string()]);
        assert_eq!(
            node.properties.get(&Field::LastSynced),
            Some(&PropertyValue::Date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()))
        );
        assert_eq!(node.last_edited.to_rfc3339(), "2024-05-02T11:30:00+00:00");
    }

    #[test]
    fn test_decode_root_in_trash() {
        let mut raw = page();
        raw["properties"]["Parent item"]["relation"] = json!([]);
        raw["in_trash"] = json!(true);

        let node = decode_page(&raw, &PropertyNames::default()).unwrap();
        assert_eq!(node.parent, None);
        assert!(node.archived);
    }

    #[test]
    fn test_title_found_under_renamed_property() {
        let names = PropertyNames {
            title: "Title".into(),
            ..Default::default()
        };
        assert_eq!(decode_page(&page(), &names).unwrap().title, "Raised Beds");
    }

    #[test]
    fn test_missing_timestamp_is_decode_error() {
        let mut raw = page();
        raw.as_object_mut().unwrap().remove("last_edited_time");
        assert!(matches!(
            decode_page(&raw, &PropertyNames::default()),
            Err(RemoteError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_properties_uses_mapped_names() {
        let names = PropertyNames {
            status: "State".into(),
            ..Default::default()
        };
        let mut props = PropertyMap::new();
        props.insert(Field::Status, PropertyValue::Status("Sync Complete".into()));
        props.insert(Field::Path, PropertyValue::Text("A/A.md".into()));
        props.insert(
            Field::LastSynced,
            PropertyValue::Date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()),
        );

        let encoded = encode_properties(&props, &names);

        assert_eq!(encoded["State"], json!({ "status": { "name": "Sync Complete" } }));
        assert_eq!(
            encoded["Obsidian Path"]["rich_text"][0]["text"]["content"],
            json!("A/A.md")
        );
        assert_eq!(encoded["Last Synced"], json!({ "date": { "start": "2024-05-02" } }));
    }

    #[test]
    fn test_classify_status_codes() {
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "{}"),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, ""),
            RemoteError::Transient(_)
        ));
        let rejected = classify(
            StatusCode::BAD_REQUEST,
            r#"{"object":"error","message":"body failed validation"}"#,
        );
        assert!(rejected.to_string().contains("body failed validation"));
    }
}
