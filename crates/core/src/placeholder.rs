//! `{{variable}}` placeholders inside message content.

use std::collections::HashMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Distinct placeholder names in first-seen order. Whitespace inside the braces
/// is ignored; empty placeholders are skipped.
pub fn placeholders(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for segment in scan(content) {
        if let Segment::Placeholder { name, .. } = segment
            && !names.iter().any(|known| known == name)
        {
            names.push(name.to_string());
        }
    }
    names
}

/// Substitutes known placeholders. Unknown ones are kept verbatim so a missing
/// value is visible in the preview.
pub fn render(content: &str, values: &HashMap<String, String>) -> String {
    let mut rendered = String::with_capacity(content.len());
    for segment in scan(content) {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Placeholder { name, raw } => match values.get(name) {
                Some(value) => rendered.push_str(value),
                None => rendered.push_str(raw),
            },
        }
    }
    rendered
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder { name: &'a str, raw: &'a str },
}

fn scan(content: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find(OPEN) {
        let after_open = &rest[open + OPEN.len()..];
        let Some(close) = after_open.find(CLOSE) else {
            break;
        };

        let name = after_open[..close].trim();
        let raw_end = open + OPEN.len() + close + CLOSE.len();
        if name.is_empty() || name.contains(OPEN) {
            // Not a placeholder; emit through the opening braces and keep scanning.
            segments.push(Segment::Literal(&rest[..open + OPEN.len()]));
            rest = after_open;
            continue;
        }

        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        segments.push(Segment::Placeholder {
            name,
            raw: &rest[open..raw_end],
        });
        rest = &rest[raw_end..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}
