//! Minimal CartoCSS text scanning shared by the migration paths: comment
//! stripping, selector-then-braces block location, and declaration splitting.

/// One parsed `name: value` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub name: String,
    pub value: String,
}

/// A `<selector>{<body>}` rule block. The selector keeps its surrounding
/// whitespace so the legacy path can reassemble text verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub selector: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Chunk {
    Outside(String),
    Block(Block),
}

/// Strip `/* */` and `//` comments. Best effort: comment-like tokens inside
/// string literals are not special-cased.
pub(crate) fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '/' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some('*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            Some('/') => {
                chars.next();
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Split text into rule blocks and the raw text between them. Brace depth is
/// tracked leniently; supported input never nests blocks. Unbalanced trailing
/// text is passed through verbatim.
pub(crate) fn chunks(input: &str) -> Vec<Chunk> {
    let mut result = Vec::new();
    let mut rest = input;

    loop {
        let Some(open) = rest.find('{') else {
            if !rest.is_empty() {
                result.push(Chunk::Outside(rest.to_string()));
            }
            break;
        };

        let selector = &rest[..open];
        let after = &rest[open + 1..];

        let mut depth = 1usize;
        let mut close = None;
        for (i, ch) in after.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }

        match close {
            Some(close) => {
                result.push(Chunk::Block(Block {
                    selector: selector.to_string(),
                    body: after[..close].to_string(),
                }));
                rest = &after[close + 1..];
            }
            None => {
                result.push(Chunk::Outside(rest.to_string()));
                break;
            }
        }
    }

    result
}

/// Split a block body into declarations, dropping empty segments. Segments
/// without a colon are ignored (not part of supported input).
pub(crate) fn declarations(body: &str) -> Vec<Declaration> {
    body.split(';')
        .filter_map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                return None;
            }
            let (name, value) = segment.split_once(':')?;
            Some(Declaration {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}
