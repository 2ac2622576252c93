//! Structural diff between two nested key-value documents.
//!
//! Documents are parsed into [`Node`] trees first; the diff itself is a pure
//! function over trees and never touches the source format.

use std::collections::BTreeMap;
use std::fmt;

use serde_yaml::Value;

use crate::error::Error;

/// A document node: either a scalar rendered as text or a nested map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Scalar(String),
    Map(BTreeMap<String, Node>),
}

pub type Document = BTreeMap<String, Node>;

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Scalar(s) => f.write_str(s),
            Node::Map(map) => {
                f.write_str("map[")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Parse a YAML document into a [`Document`]. Empty input is an empty map.
pub fn parse_document(text: &str) -> Result<Document, Error> {
    if text.trim().is_empty() {
        return Ok(Document::new());
    }
    match serde_yaml::from_str::<Value>(text)? {
        Value::Null => Ok(Document::new()),
        Value::Mapping(map) => Ok(convert_mapping(map)),
        _ => Err(Error::NotAMapping),
    }
}

fn convert_mapping(map: serde_yaml::Mapping) -> Document {
    map.into_iter()
        .map(|(k, v)| (scalar_text(&k), convert(v)))
        .collect()
}

fn convert(value: Value) -> Node {
    match value {
        Value::Mapping(map) => Node::Map(convert_mapping(map)),
        Value::Tagged(tagged) => convert(tagged.value),
        other => Node::Scalar(scalar_text(&other)),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => {
            let items: Vec<String> = items.iter().map(|v| convert(v.clone()).to_string()).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(_) => convert(value.clone()).to_string(),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: ChangeKind,
    pub key: String,
    pub value: String,
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.kind {
            ChangeKind::Added => '+',
            ChangeKind::Removed => '-',
        };
        write!(f, "{} {}: {}", sign, self.key, self.value)
    }
}

/// Change lines grouped by dot-joined parent path (`""` for top level).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    groups: BTreeMap<String, Vec<DiffLine>>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, path: &str) -> Option<&[DiffLine]> {
        self.groups.get(path).map(Vec::as_slice)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    fn push(&mut self, path: &str, kind: ChangeKind, key: &str, value: &Node) {
        self.groups.entry(path.to_string()).or_default().push(DiffLine {
            kind,
            key: key.to_string(),
            value: value.to_string(),
        });
    }
}

impl fmt::Display for TreeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, lines) in &self.groups {
            if !path.is_empty() {
                writeln!(f, "{path}:")?;
            }
            for line in lines {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}

/// Diff two documents. Keys present on both sides recurse only when both
/// values are maps; a scalar/map type change is a flat replacement.
pub fn diff_documents(old: &Document, new: &Document) -> TreeDiff {
    let mut diff = TreeDiff::default();
    diff_level(&mut diff, "", old, new);
    diff
}

fn diff_level(diff: &mut TreeDiff, path: &str, old: &Document, new: &Document) {
    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        match (old.get(key), new.get(key)) {
            (Some(Node::Map(old_map)), Some(Node::Map(new_map))) => {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                diff_level(diff, &child, old_map, new_map);
            }
            (Some(old_val), Some(new_val)) => {
                if old_val.to_string() != new_val.to_string() {
                    diff.push(path, ChangeKind::Removed, key, old_val);
                    diff.push(path, ChangeKind::Added, key, new_val);
                }
            }
            (Some(old_val), None) => diff.push(path, ChangeKind::Removed, key, old_val),
            (None, Some(new_val)) => diff.push(path, ChangeKind::Added, key, new_val),
            (None, None) => {}
        }
    }
}

/// Parse both texts and render their diff. A parse failure on either side
/// becomes the report text instead of an error.
pub fn change_report(old_text: &str, new_text: &str) -> String {
    let old = match parse_document(old_text) {
        Ok(doc) => doc,
        Err(e) => return format!("error parsing previous document: {e}"),
    };
    let new = match parse_document(new_text) {
        Ok(doc) => doc,
        Err(e) => return format!("error parsing new document: {e}"),
    };
    diff_documents(&old, &new).to_string()
}
