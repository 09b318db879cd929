//! Optional canvas side-artifact next to a node's document.
//!
//! A record with its canvas flag set gets `<dir>/<title>.canvas`, a JSON canvas
//! holding one text card with the record's title. Clearing the flag removes the
//! canvas; the document stays.

use crate::error::Result;
use crate::fs::FileSystem;
use crate::markdown::CodecError;
use crate::paths::NodePath;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    /// A canvas with a single centered text card
    pub fn with_title(title: &str) -> Self {
        let id: [u8; 8] = rand::rng().random();
        Self {
            nodes: vec![CanvasNode {
                id: hex::encode(id),
                kind: "text".to_string(),
                text: title.to_string(),
                x: -125,
                y: -30,
                width: 250,
                height: 60,
            }],
            edges: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasAction {
    Created,
    Removed,
    Unchanged,
}

/// Make the canvas file match the record's flag.
///
/// An existing canvas is never rewritten, so edits made in the canvas survive.
pub async fn sync_canvas<F: FileSystem + ?Sized>(
    fs: &F,
    path: &NodePath,
    title: &str,
    enabled: bool,
) -> Result<CanvasAction> {
    let canvas_path = path.canvas();
    let exists = fs.exists(&canvas_path).await?;

    match (enabled, exists) {
        (true, false) => {
            let content = serde_json::to_string_pretty(&Canvas::with_title(title))
                .map_err(CodecError::from)?;
            fs.write(&canvas_path, content.as_bytes()).await?;
            debug!("Created canvas {}", canvas_path);
            Ok(CanvasAction::Created)
        }
        (false, true) => {
            fs.delete(&canvas_path).await?;
            debug!("Removed canvas {}", canvas_path);
            Ok(CanvasAction::Removed)
        }
        _ => Ok(CanvasAction::Unchanged),
    }
}
