//! The map document (MML) handed to the style compiler.
//!
//! The document is assembled fresh for every compile call and serialized to
//! JSON at the compiler boundary; nothing here is cached or shared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection and geometry parameters for one layer's data source.
///
/// Kept as an ordered map because the builder composes it by layered
/// override (global defaults, per-call base options, geometry column,
/// extend, extras) and callers may introduce arbitrary driver keys.
pub type Datasource = BTreeMap<String, Value>;

/// Ordered sequence of layers plus global map attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDocument {
    pub srs: String,
    #[serde(rename = "maximum-extent", skip_serializing_if = "Option::is_none")]
    pub maximum_extent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "Layer")]
    pub layers: Vec<Layer>,
    #[serde(rename = "Stylesheet", default, skip_serializing_if = "Vec::is_empty")]
    pub stylesheets: Vec<StylesheetFragment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactivity: Vec<Interactivity>,
}

/// One renderable layer. `properties` is a sparse mapping populated only for
/// rendering hints present in the caller's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub srs: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
    #[serde(rename = "Datasource")]
    pub datasource: Datasource,
}

/// A `{id, data}` style fragment holding migrated CartoCSS text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylesheetFragment {
    pub id: String,
    pub data: String,
}

/// UTF-grid interactivity attachment for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactivity {
    pub layer: String,
    pub fields: Vec<String>,
}
