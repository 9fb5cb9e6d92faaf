use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage categories. The diagram core treats these as opaque tags;
/// only the plan assembly cares which is which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Model,
    Data,
    Preprocess,
    Loss,
    Optimizer,
    Hyperparameters,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Model => "model",
            Category::Data => "data",
            Category::Preprocess => "preprocess",
            Category::Loss => "loss",
            Category::Optimizer => "optimizer",
            Category::Hyperparameters => "hyperparameters",
        };
        f.write_str(s)
    }
}

/// A typed property value. Untagged so documents read/write plain JSON
/// scalars; integers must be tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Text(_) => "string",
        }
    }

    pub fn same_kind(&self, other: &PropertyValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Ordered property bag. Order matters: the property panel and the save file
/// both reproduce catalog order.
pub type Kwargs = IndexMap<String, PropertyValue>;

/// One toolbox entry: the initial label and default kwargs for new nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTemplate {
    pub name: String,
    pub kwargs: Kwargs,
}

/// The module catalog backing the toolbox, loaded from `modules.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub version: String,
    pub modules: IndexMap<Category, Vec<ModuleTemplate>>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Catalog, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
