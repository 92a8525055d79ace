//! Clip-default migration (the 2.x → 3.x path).
//!
//! Mapnik 3 stopped clipping symbolizers to the tile by default. For every
//! rule block using a symbolizer family, this pass appends an explicit
//! `<family>-clip: true` unless the block already sets one, preserving the
//! pre-3.x appearance.
//!
//! Unlike the legacy marker path this works on a structural rule/declaration
//! model and re-emits blocks canonically, which makes re-running the pass on
//! its own output a no-op.

use super::scan::{self, Chunk, Declaration};

const FAMILIES: [&str; 5] = ["polygon", "line", "marker", "shield", "text"];

pub(crate) fn apply(style: &str) -> String {
    let stripped = scan::strip_comments(style);
    let mut out = String::new();

    for chunk in scan::chunks(&stripped) {
        match chunk {
            Chunk::Outside(text) => {
                // Whitespace between blocks is dropped; canonical emission
                // below reintroduces it deterministically.
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(text);
                    out.push('\n');
                }
            }
            Chunk::Block(block) => {
                let mut decls = scan::declarations(&block.body);
                for family in FAMILIES {
                    let clip_name = format!("{family}-clip");
                    let uses_family = decls.iter().any(|d| in_family(&d.name, family));
                    let has_clip = decls
                        .iter()
                        .any(|d| d.name.eq_ignore_ascii_case(&clip_name));
                    if uses_family && !has_clip {
                        decls.push(Declaration {
                            name: clip_name,
                            value: "true".to_string(),
                        });
                    }
                }
                emit_block(&mut out, block.selector.trim(), &decls);
            }
        }
    }

    out
}

fn in_family(name: &str, family: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == family
        || (lower.starts_with(family) && lower.as_bytes().get(family.len()) == Some(&b'-'))
}

fn emit_block(out: &mut String, selector: &str, decls: &[Declaration]) {
    out.push_str(selector);
    out.push_str(" {\n");
    for decl in decls {
        out.push_str("  ");
        out.push_str(&decl.name);
        out.push_str(": ");
        out.push_str(&decl.value);
        out.push_str(";\n");
    }
    out.push_str("}\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_clip_per_used_family() {
        let out = apply("#t { line-width: 2; polygon-fill: #fff; }");
        assert!(out.contains("line-clip: true;"), "{out}");
        assert!(out.contains("polygon-clip: true;"), "{out}");
        assert!(!out.contains("marker-clip"), "{out}");
        assert!(!out.contains("text-clip"), "{out}");
        assert!(!out.contains("shield-clip"), "{out}");
    }

    #[test]
    fn respects_existing_clip_setting() {
        let out = apply("#t { line-width: 2; line-clip: false; }");
        assert!(out.contains("line-clip: false;"), "{out}");
        assert!(!out.contains("line-clip: true;"), "{out}");
    }

    #[test]
    fn preserves_declaration_order_and_only_appends() {
        let out = apply("#t { text-name: [name]; text-face-name: 'DejaVu'; }");
        let name_at = out.find("text-name").expect("text-name kept");
        let face_at = out.find("text-face-name").expect("face kept");
        let clip_at = out.find("text-clip").expect("clip appended");
        assert!(name_at < face_at && face_at < clip_at, "{out}");
    }

    #[test]
    fn is_idempotent() {
        let input = "#a { line-width: 1; }\n#b [zoom>3] { marker-fill: red; shield-name: [n]; }";
        let once = apply(input);
        let twice = apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn handles_multiple_blocks() {
        let out = apply("#a { line-width: 1; }\n#b { polygon-fill: red; }");
        assert!(out.contains("#a {"), "{out}");
        assert!(out.contains("#b {"), "{out}");
        assert_eq!(out.matches("-clip: true;").count(), 2, "{out}");
    }
}
