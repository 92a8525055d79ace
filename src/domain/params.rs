//! Per-call map parameters as supplied by the caller.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// A parameter that may be supplied once (applying everywhere) or as a
/// per-layer array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Resolve the value applying to a given layer index: a scalar applies to
    /// every index, an array only to its own.
    pub fn for_index(&self, index: usize) -> Option<&T> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(items) => items.get(index),
        }
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(items) => items.clone(),
        }
    }
}

/// Geometry-column descriptor: either a bare column name or a tagged
/// `{type, name}` form selecting between geometry and raster columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum GeomColumn {
    Name(String),
    Spec {
        #[serde(rename = "type")]
        kind: Option<String>,
        name: Option<String>,
    },
}

/// Recognized per-call parameters. Unknown keys land in `extra`, from which
/// the builder picks the fixed allow-list of layer rendering hints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MapParams {
    pub dbname: Option<String>,
    pub sql: Option<OneOrMany<String>>,
    pub ids: Option<Vec<String>>,
    pub gcols: Option<Vec<Option<GeomColumn>>>,
    pub extra_ds_opts: Option<Vec<Option<BTreeMap<String, Value>>>>,
    pub datasource_extend: Option<Vec<Option<BTreeMap<String, Value>>>>,
    pub geom_type: Option<String>,
    pub style: Option<OneOrMany<String>>,
    pub style_version: Option<OneOrMany<String>>,
    pub interactivity: Option<OneOrMany<Value>>,
    pub layer: Option<Value>,
    pub dbuser: Option<String>,
    pub dbpassword: Option<String>,
    pub dbhost: Option<String>,
    pub dbport: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
