use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use color_eyre::{eyre::Context as _, Result};
use tracing::{info, instrument};

/// Map keys of the tagged value tree. Numeric keys sort numerically,
/// string keys lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Map(Vec<(Key, Value)>),
}

impl Value {
    pub fn empty_map() -> Self {
        Value::Map(Vec::new())
    }

    /// Append an entry; only meaningful on maps.
    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        if let Value::Map(entries) = self {
            entries.push((key.into(), value.into()));
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n as i64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Int(n as i64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

fn key_cmp(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Int(x), Key::Int(y)) => x.cmp(y),
        (Key::Str(x), Key::Str(y)) => x.cmp(y),
        (Key::Int(_), Key::Str(_)) => Ordering::Less,
        (Key::Str(_), Key::Int(_)) => Ordering::Greater,
    }
}

/// Canonically sort every map in the tree, recursively. With identical
/// inputs the rendered output is then byte-identical across runs.
pub fn sort_canonical(value: &mut Value) {
    if let Value::Map(entries) = value {
        entries.sort_by(|a, b| key_cmp(&a.0, &b.0));
        for (_, v) in entries.iter_mut() {
            sort_canonical(v);
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Str(s) => {
            let _ = write!(out, "'{}'", escape(s));
        }
        Value::Map(entries) if entries.is_empty() => out.push_str("{}"),
        Value::Map(entries) => {
            out.push_str("{\n");
            for (key, v) in entries {
                for _ in 0..depth {
                    out.push_str("  ");
                }
                match key {
                    Key::Int(n) => {
                        let _ = write!(out, "'{n}' => ");
                    }
                    Key::Str(s) => {
                        let _ = write!(out, "'{}' => ", escape(s));
                    }
                }
                write_value(out, v, depth + 1);
                out.push_str(",\n");
            }
            for _ in 0..depth - 1 {
                out.push_str("  ");
            }
            out.push('}');
        }
    }
}

pub fn render(root: &Value) -> String {
    let mut out = String::new();
    out.push_str("$VAR1 = ");
    write_value(&mut out, root, 1);
    out.push_str(";\n");
    out
}

/// Write the dump atomically: fully rendered, persisted to a sibling
/// temporary file, then renamed into place. A failed run leaves no
/// partial output.
#[instrument(skip(root))]
pub fn emit_to_file(path: &Path, root: &Value) -> Result<()> {
    let rendered = render(root);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ABI.dump".to_owned());
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp, &rendered)
        .wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .wrap_err_with(|| format!("failed to move dump into place at {}", path.display()))?;
    info!(path = %path.display(), bytes = rendered.len(), "wrote ABI dump");
    Ok(())
}

pub fn emit_to_stdout(root: &Value) -> Result<()> {
    io::stdout()
        .write_all(render(root).as_bytes())
        .wrap_err("failed to write dump to stdout")?;
    Ok(())
}
