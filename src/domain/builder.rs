//! Map document assembly: layers, datasources, and style attachment.
//!
//! Pure functions over caller parameters and configured defaults; all
//! validation happens here, before any asynchronous work starts.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::domain::{
    document::{Datasource, Interactivity, Layer, MapDocument, StylesheetFragment},
    error::DomainError,
    migrate,
    params::{GeomColumn, MapParams, OneOrMany},
};

/// Layer rendering hints copied through when present in the caller's
/// parameters, as a scalar or a per-layer array.
const LAYER_PROPERTY_KEYS: [&str; 6] = [
    "buffer-size",
    "cache-features",
    "maximum-scale-denominator",
    "minimum-scale-denominator",
    "queryable",
    "status",
];

/// Configured defaults feeding the document builder, resolved from settings
/// by the caller.
#[derive(Debug, Clone)]
pub struct BuildDefaults {
    pub srid: u32,
    pub maximum_extent: Option<String>,
    pub format: Option<String>,
    /// Global datasource defaults (driver type, host, credentials, extent).
    pub datasource: Datasource,
    pub geometry_field: String,
    pub raster_field: String,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        let mut datasource = Datasource::new();
        datasource.insert("type".to_string(), json!("postgis"));
        datasource.insert("srid".to_string(), json!(4326));
        Self {
            srid: 3857,
            maximum_extent: Some(
                "-20037508.3,-20037508.3,20037508.3,20037508.3".to_string(),
            ),
            format: Some("png8".to_string()),
            datasource,
            geometry_field: "the_geom".to_string(),
            raster_field: "the_raster_webmercator".to_string(),
        }
    }
}

/// Build the layer/datasource document structure from caller parameters.
///
/// One layer per declared SQL source, ids defaulting to `layer{i}`. Fails
/// with a validation error for missing required fields or malformed optional
/// ones; never performs I/O.
pub fn build_document(
    params: &MapParams,
    defaults: &BuildDefaults,
) -> Result<MapDocument, DomainError> {
    let dbname = params
        .dbname
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| DomainError::validation("missing required parameter `dbname`"))?;

    let sql = params
        .sql
        .as_ref()
        .map(OneOrMany::to_vec)
        .unwrap_or_default();
    if sql.is_empty() {
        return Err(DomainError::validation(
            "missing required parameter `sql`",
        ));
    }

    let interactivity_target = interactivity_target(params)?;
    validate_interactivity_entries(params)?;

    let srs = srs_for(defaults.srid);
    let mut layers = Vec::with_capacity(sql.len());
    let mut interactivity = Vec::new();

    for (index, query) in sql.iter().enumerate() {
        let id = layer_id(params, index);
        let datasource = build_datasource(params, defaults, dbname, query, index)?;
        let properties = layer_properties(params, index);

        if let Some(fields) = interactivity_fields(params, index, interactivity_target) {
            interactivity.push(Interactivity {
                layer: id.clone(),
                fields,
            });
        }

        layers.push(Layer {
            id: id.clone(),
            name: id,
            srs: srs.clone(),
            properties,
            datasource,
        });
    }

    Ok(MapDocument {
        srs,
        maximum_extent: defaults.maximum_extent.clone(),
        format: defaults.format.clone(),
        layers,
        stylesheets: Vec::new(),
        interactivity,
    })
}

/// Migrate the supplied styles to the target renderer version and attach them
/// as stylesheet fragments.
///
/// A style array yields one fragment per entry with its `#layer` placeholder
/// selector rewritten to the corresponding layer id; a single style string is
/// attached verbatim (callers use the convention that it addresses all layers
/// itself). Blank array entries are rejected, naming the offending index,
/// before any migration runs.
pub fn attach_styles(
    document: &mut MapDocument,
    params: &MapParams,
    target_version: &str,
    default_style_version: &str,
) -> Result<(), DomainError> {
    let Some(style) = params.style.as_ref() else {
        return Ok(());
    };

    match style {
        OneOrMany::One(text) => {
            if text.trim().is_empty() {
                return Err(DomainError::validation("style0: CartoCSS is empty"));
            }
            let version = style_version(params, 0, default_style_version);
            let data = migrate::migrate(text, &version, target_version)?;
            document.stylesheets.push(StylesheetFragment {
                id: "style0".to_string(),
                data,
            });
        }
        OneOrMany::Many(styles) => {
            for (index, text) in styles.iter().enumerate() {
                if text.trim().is_empty() {
                    return Err(DomainError::validation(format!(
                        "style{index}: CartoCSS is empty"
                    )));
                }
            }
            for (index, text) in styles.iter().enumerate() {
                let id = layer_id(params, index);
                let renamed = rewrite_layer_placeholder(text, &id);
                let version = style_version(params, index, default_style_version);
                let data = migrate::migrate(&renamed, &version, target_version)?;
                document.stylesheets.push(StylesheetFragment {
                    id: format!("style{index}"),
                    data,
                });
            }
        }
    }

    Ok(())
}

fn srs_for(srid: u32) -> String {
    format!("+init=epsg:{srid}")
}

fn layer_id(params: &MapParams, index: usize) -> String {
    params
        .ids
        .as_ref()
        .and_then(|ids| ids.get(index))
        .filter(|id| !id.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| format!("layer{index}"))
}

fn style_version(params: &MapParams, index: usize, default_version: &str) -> String {
    params
        .style_version
        .as_ref()
        .and_then(|versions| versions.for_index(index))
        .filter(|version| !version.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| default_version.to_string())
}

/// Compose one layer's datasource by layered override: global defaults, then
/// per-call base options, then the geometry-column override, then the extend
/// table (replace), then extra options (fill only if absent).
fn build_datasource(
    params: &MapParams,
    defaults: &BuildDefaults,
    dbname: &str,
    query: &str,
    index: usize,
) -> Result<Datasource, DomainError> {
    let mut ds = defaults.datasource.clone();
    ds.insert("dbname".to_string(), json!(dbname));
    ds.insert("table".to_string(), json!(query));

    if let Some(user) = params.dbuser.as_deref() {
        ds.insert("user".to_string(), json!(user));
    }
    if let Some(password) = params.dbpassword.as_deref() {
        ds.insert("password".to_string(), json!(password));
    }
    if let Some(host) = params.dbhost.as_deref() {
        ds.insert("host".to_string(), json!(host));
    }
    if let Some(port) = params.dbport.as_ref() {
        ds.insert("port".to_string(), port.clone());
    }

    apply_geometry_column(&mut ds, params, defaults, index)?;

    if let Some(extend) = per_layer_table(params.datasource_extend.as_deref(), index) {
        for (key, value) in extend {
            ds.insert(key.clone(), value.clone());
        }
    }

    if let Some(extras) = per_layer_table(params.extra_ds_opts.as_deref(), index) {
        for (key, value) in extras {
            ds.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    Ok(ds)
}

/// Exactly one of `geometry_field`/`raster_field` ends up set, chosen by the
/// column type tag.
fn apply_geometry_column(
    ds: &mut Datasource,
    params: &MapParams,
    defaults: &BuildDefaults,
    index: usize,
) -> Result<(), DomainError> {
    let column = params
        .gcols
        .as_ref()
        .and_then(|cols| cols.get(index))
        .and_then(|col| col.as_ref());

    let (key, name) = match column {
        None => ("geometry_field", defaults.geometry_field.clone()),
        Some(GeomColumn::Name(name)) => {
            if name.trim().is_empty() {
                return Err(missing_column_name(index));
            }
            ("geometry_field", name.clone())
        }
        Some(GeomColumn::Spec { kind, name }) => {
            let name = name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| missing_column_name(index))?;
            match kind.as_deref().unwrap_or("geometry") {
                "geometry" => ("geometry_field", name.to_string()),
                "raster" => ("raster_field", name.to_string()),
                other => {
                    return Err(DomainError::validation(format!(
                        "gcols[{index}]: unsupported column type `{other}`"
                    )));
                }
            }
        }
    };

    ds.remove("geometry_field");
    ds.remove("raster_field");
    ds.insert(key.to_string(), json!(name));
    Ok(())
}

fn missing_column_name(index: usize) -> DomainError {
    DomainError::validation(format!("gcols[{index}]: missing column name"))
}

fn per_layer_table(
    tables: Option<&[Option<BTreeMap<String, Value>>]>,
    index: usize,
) -> Option<&BTreeMap<String, Value>> {
    tables.and_then(|tables| tables.get(index)).and_then(Option::as_ref)
}

/// Populate the sparse property map from the fixed allow-list, plus zoom
/// bounds when numeric.
fn layer_properties(params: &MapParams, index: usize) -> BTreeMap<String, Value> {
    let mut properties = BTreeMap::new();

    for key in LAYER_PROPERTY_KEYS {
        if let Some(value) = resolve_per_layer(params.extra.get(key), index) {
            properties.insert(key.to_string(), value);
        }
    }

    for key in ["minzoom", "maxzoom"] {
        if let Some(value) = resolve_per_layer(params.extra.get(key), index)
            && value.is_number()
        {
            properties.insert(key.to_string(), value);
        }
    }

    properties
}

fn resolve_per_layer(value: Option<&Value>, index: usize) -> Option<Value> {
    match value? {
        Value::Array(items) => items.get(index).filter(|v| !v.is_null()).cloned(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

/// The layer index a scalar interactivity specification targets, from the
/// `layer` parameter. Must be a finite non-negative integer when present.
fn interactivity_target(params: &MapParams) -> Result<usize, DomainError> {
    let Some(value) = params.layer.as_ref() else {
        return Ok(0);
    };
    let invalid =
        || DomainError::validation("`layer` must be a finite non-negative integer");

    let number = value.as_number().ok_or_else(invalid)?;
    if let Some(index) = number.as_u64() {
        return Ok(index as usize);
    }
    match number.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
        _ => Err(invalid()),
    }
}

/// Every supplied interactivity entry must be text (or null), even at indices
/// no layer uses.
fn validate_interactivity_entries(params: &MapParams) -> Result<(), DomainError> {
    let Some(spec) = params.interactivity.as_ref() else {
        return Ok(());
    };
    let entries: Vec<&Value> = match spec {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values.iter().collect(),
    };
    for (index, entry) in entries.iter().enumerate() {
        if !entry.is_null() && !entry.is_string() {
            return Err(DomainError::validation(format!(
                "invalid interactivity specification at index {index}: expected text"
            )));
        }
    }
    Ok(())
}

fn interactivity_fields(
    params: &MapParams,
    index: usize,
    target: usize,
) -> Option<Vec<String>> {
    let spec = params.interactivity.as_ref()?;
    let entry = match spec {
        OneOrMany::One(value) => (index == target).then_some(value),
        OneOrMany::Many(values) => values.get(index),
    }?;
    let text = entry.as_str()?;
    let fields: Vec<String> = text
        .split(',')
        .map(|field| field.trim().to_string())
        .filter(|field| !field.is_empty())
        .collect();
    (!fields.is_empty()).then_some(fields)
}

/// Rewrite the `#layer` placeholder selector to a concrete layer id, leaving
/// longer identifiers (`#layers`, `#layer0`) untouched.
fn rewrite_layer_placeholder(style: &str, layer_id: &str) -> String {
    const PLACEHOLDER: &str = "#layer";
    let mut out = String::with_capacity(style.len());
    let mut rest = style;

    while let Some(at) = rest.find(PLACEHOLDER) {
        let after = &rest[at + PLACEHOLDER.len()..];
        let boundary = after
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '-'));
        out.push_str(&rest[..at]);
        if boundary {
            out.push('#');
            out.push_str(layer_id);
        } else {
            out.push_str(PLACEHOLDER);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}
