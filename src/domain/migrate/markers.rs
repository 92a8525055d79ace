//! Legacy marker migration (the 2.0 → 2.1 path).
//!
//! Mapnik 2.1 changed marker defaults: sizes became diameters, placement and
//! type gained geometry-dependent defaults, and markers started clipping to
//! the tile. This pass doubles the affected size literals and appends
//! geometry-conditioned override blocks reproducing the old appearance.
//!
//! The pass is quasi-textual by design: rule blocks are located by a
//! selector-then-braces scan and declarations by splitting on `;`/`:`.
//! Re-applying it doubles sizes again; that mirrors the version-pair
//! semantics and is why the caller only routes known pairs here.

use std::collections::BTreeMap;

use super::scan::{self, Chunk};

#[derive(Debug, Clone, Copy)]
pub(crate) struct MarkerTransform {
    /// Double `marker-width`/`marker-height` literals. Off when the source
    /// version already sizes markers as diameters.
    pub double_sizes: bool,
    /// Append `marker-multi-policy: whole` to the line/polygon override.
    pub multi_policy: bool,
    /// Append the geometry-conditioned override blocks.
    pub synthesize_overrides: bool,
}

pub(crate) fn apply(style: &str, transform: &MarkerTransform) -> String {
    let stripped = scan::strip_comments(style);
    let mut out = String::new();
    // Marker directives seen in unconditioned blocks carry over to later
    // blocks; later unconditioned blocks overwrite earlier entries.
    let mut global: BTreeMap<String, String> = BTreeMap::new();

    for chunk in scan::chunks(&stripped) {
        match chunk {
            Chunk::Outside(text) => out.push_str(&text),
            Chunk::Block(block) => {
                let (body, markers) = process_body(&block.body, transform);
                out.push_str(&block.selector);
                out.push('{');
                out.push_str(&body);
                if !body.is_empty() {
                    out.push(' ');
                }
                out.push('}');

                let mut effective = global.clone();
                effective.extend(markers.iter().map(|(k, v)| (k.clone(), v.clone())));
                if !block.selector.contains('[') {
                    global.extend(markers);
                }

                if transform.synthesize_overrides && !effective.is_empty() {
                    out.push_str(&override_blocks(
                        block.selector.trim(),
                        &effective,
                        transform,
                    ));
                }
            }
        }
    }

    out
}

/// Rewrite a block body declaration by declaration: rename `marker-opacity`,
/// double size literals, and record the first occurrence of each distinct
/// marker directive (later duplicates are inert).
fn process_body(
    body: &str,
    transform: &MarkerTransform,
) -> (String, BTreeMap<String, String>) {
    let mut markers = BTreeMap::new();
    let mut emitted = String::new();

    for mut decl in scan::declarations(body) {
        let mut lower = decl.name.to_ascii_lowercase();
        if lower == "marker-opacity" {
            decl.name = "marker-fill-opacity".to_string();
            lower = decl.name.clone();
        }
        if transform.double_sizes && (lower == "marker-width" || lower == "marker-height") {
            decl.value = double_numeric(&decl.value);
        }
        if lower.starts_with("marker-") && !markers.contains_key(&lower) {
            markers.insert(lower, decl.value.clone());
        }
        emitted.push(' ');
        emitted.push_str(&decl.name);
        emitted.push(':');
        emitted.push_str(&decl.value);
        emitted.push(';');
    }

    (emitted, markers)
}

/// Multiply a numeric literal by two, preserving surrounding quotes.
/// Non-numeric values are left untouched.
fn double_numeric(value: &str) -> String {
    let trimmed = value.trim();
    let (quote, inner) = match trimmed.as_bytes() {
        [b'"', .., b'"'] if trimmed.len() >= 2 => (Some('"'), &trimmed[1..trimmed.len() - 1]),
        [b'\'', .., b'\''] if trimmed.len() >= 2 => (Some('\''), &trimmed[1..trimmed.len() - 1]),
        _ => (None, trimmed),
    };

    match inner.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => {
            let doubled = format_number(number * 2.0);
            match quote {
                Some(q) => format!("{q}{doubled}{q}"),
                None => doubled,
            }
        }
        _ => value.to_string(),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Synthesize the geometry-conditioned override blocks for a rule whose
/// effective directive set mentions markers. Explicit placement/type win over
/// the defaults; a point placement forces the ellipse type and suppresses the
/// arrow transform.
fn override_blocks(
    selector: &str,
    effective: &BTreeMap<String, String>,
    transform: &MarkerTransform,
) -> String {
    let explicit_placement = effective.get("marker-placement").map(String::as_str);
    let explicit_type = effective.get("marker-type").map(String::as_str);
    let force_ellipse = explicit_placement == Some("point");

    let point_placement = explicit_placement.unwrap_or("point");
    let line_placement = explicit_placement.unwrap_or("line");
    let point_type = if force_ellipse {
        "ellipse"
    } else {
        explicit_type.unwrap_or("ellipse")
    };
    let line_type = if force_ellipse {
        "ellipse"
    } else {
        explicit_type.unwrap_or("arrow")
    };

    let mut out = String::new();

    out.push_str(&format!(
        "\n{selector} [\"mapnik::geometry_type\"=1] {{\n  marker-placement:{point_placement};\n  marker-type:{point_type};\n"
    ));
    if point_type == "arrow" {
        out.push_str("  marker-transform:scale(0.5, 0.5);\n");
    }
    out.push_str("}\n");

    out.push_str(&format!(
        "{selector} [\"mapnik::geometry_type\">1] {{\n  marker-placement:{line_placement};\n  marker-type:{line_type};\n"
    ));
    if line_type == "arrow" {
        out.push_str("  marker-transform:scale(0.5, 0.5);\n");
    }
    out.push_str("  marker-clip:false;\n");
    if transform.multi_policy {
        out.push_str("  marker-multi-policy:whole;\n");
    }
    out.push_str("}\n");

    out
}
