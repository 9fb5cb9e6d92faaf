use std::fmt;
use std::path::Path;

use egui::pos2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Category, Kwargs};
use crate::graph::{Diagram, Node, NodeId};

/// Version tag written into every save file.
pub const SAVE_VERSION: &str = "0.1.0";

/// Persisted document. `models` holds only sink nodes (no outgoing arrow);
/// everything upstream nests under `in_items`, one entry per downstream path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFile {
    pub save_version: String,
    pub module_version: String,
    pub scene: SceneMeta,
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMeta {
    pub item_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub dtype: Category,
    pub pos: [f32; 2],
    pub kwargs: Kwargs,
    pub in_items: Vec<ModelEntry>,
}

/// Non-fatal findings while loading; the document still loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    SaveVersion { found: String, expected: String },
    ModuleVersion { found: String, expected: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::SaveVersion { found, expected } => {
                write!(f, "different save version: file has {found}, expected {expected}")
            }
            LoadWarning::ModuleVersion { found, expected } => {
                write!(f, "different module version: file has {found}, expected {expected}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read or write save file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse save file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serializes the diagram as a forest rooted at its sinks. Each root's
/// upstream subtree is emitted by recursively following incoming arrows.
/// The one-outgoing-arrow-per-node rule makes the recursion finite: a node
/// can only appear under the single consumer its outgoing arrow feeds.
pub fn serialize(diagram: &Diagram, module_version: &str) -> SaveFile {
    fn traverse(diagram: &Diagram, node: NodeId, n: &Node) -> ModelEntry {
        let in_items = diagram
            .incoming(node)
            .filter_map(|a| diagram.arrow(a))
            .filter_map(|arrow| {
                diagram
                    .node(arrow.start)
                    .map(|up| traverse(diagram, arrow.start, up))
            })
            .collect();
        ModelEntry {
            name: n.label.clone(),
            dtype: n.category,
            pos: [n.pos.x, n.pos.y],
            kwargs: n.kwargs.clone(),
            in_items,
        }
    }

    let models = diagram
        .nodes()
        .filter(|(id, _)| diagram.outgoing(*id).next().is_none())
        .map(|(id, n)| traverse(diagram, id, n))
        .collect();

    SaveFile {
        save_version: SAVE_VERSION.to_owned(),
        module_version: module_version.to_owned(),
        scene: SceneMeta {
            item_count: diagram.item_count,
        },
        models,
    }
}

/// Rebuilds a diagram from a document, creating each root and its upstream
/// nodes recursively, wiring an arrow from every fresh upstream node to its
/// downstream consumer. Version mismatches are reported, never fatal.
pub fn deserialize(file: &SaveFile, module_version: &str) -> (Diagram, Vec<LoadWarning>) {
    let mut warnings = Vec::new();
    if file.save_version != SAVE_VERSION {
        warnings.push(LoadWarning::SaveVersion {
            found: file.save_version.clone(),
            expected: SAVE_VERSION.to_owned(),
        });
    }
    if file.module_version != module_version {
        warnings.push(LoadWarning::ModuleVersion {
            found: file.module_version.clone(),
            expected: module_version.to_owned(),
        });
    }
    for w in &warnings {
        log::warn!("{w}");
    }

    fn add_entry(diagram: &mut Diagram, entry: &ModelEntry) -> NodeId {
        let id = diagram.add_node(
            entry.name.clone(),
            entry.dtype,
            &entry.kwargs,
            pos2(entry.pos[0], entry.pos[1]),
        );
        for upstream in &entry.in_items {
            let up = add_entry(diagram, upstream);
            // Every upstream node is freshly created, so the connect checks
            // always pass for well-formed documents.
            if let Err(err) = diagram.connect(up, id) {
                log::warn!("skipped malformed connection in save file: {err}");
            }
        }
        id
    }

    let mut diagram = Diagram::new();
    for entry in &file.models {
        add_entry(&mut diagram, entry);
    }
    diagram.item_count = file.scene.item_count;
    (diagram, warnings)
}

pub fn save_to_path(
    path: &Path,
    diagram: &Diagram,
    module_version: &str,
) -> Result<(), DocumentError> {
    let file = serialize(diagram, module_version);
    let text = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, text)?;
    Ok(())
}

pub fn load_from_path(
    path: &Path,
    module_version: &str,
) -> Result<(Diagram, Vec<LoadWarning>), DocumentError> {
    let text = std::fs::read_to_string(path)?;
    let file: SaveFile = serde_json::from_str(&text)?;
    Ok(deserialize(&file, module_version))
}
