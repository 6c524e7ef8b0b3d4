//! Variable resolution shared by rule matching, output filters and
//! command argument building.
//!
//! Names resolve in this order:
//! - a key of the envelope variables (`topic`, `uuid`, `datetime`, `username`)
//! - `data`: the whole parsed payload
//! - `data.<key>`: one top-level key of the parsed payload
//!
//! Non-string values are rendered as canonical JSON text (see [`dump`]).

use std::collections::HashMap;
use std::io;

use regex::Regex;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;

/// Envelope variables keyed by name.
pub type Variables = HashMap<String, String>;

/// Prefix selecting a key of the parsed payload.
const DATA_PREFIX: &str = "data.";

/// The requested name resolves to nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown variable '{0}'")]
pub struct UnknownVariable(pub String);

/// Resolve `name` against the envelope variables and the parsed payload.
pub fn lookup(name: &str, variables: &Variables, data: &Value) -> Result<String, UnknownVariable> {
    if let Some(value) = variables.get(name) {
        return Ok(value.clone());
    }
    if name == "data" {
        return Ok(dump(data));
    }
    if let Some(key) = name.strip_prefix(DATA_PREFIX) {
        if let Some(value) = data.as_object().and_then(|object| object.get(key)) {
            return Ok(dump(value));
        }
    }
    Err(UnknownVariable(name.to_string()))
}

/// Strings pass through untouched; anything else is dumped as JSON.
pub fn dump(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => to_canonical_json(other),
    }
}

/// True when `pattern` matches `value` starting at position 0.
///
/// Trailing text after the match is permitted, and `$` also matches just
/// before a single trailing newline.
pub fn prefix_match(pattern: &Regex, value: &str) -> bool {
    // Leftmost-first search: a match anchored at 0 is always the one reported.
    let anchored = |text: &str| pattern.find(text).is_some_and(|m| m.start() == 0);
    anchored(value) || value.strip_suffix('\n').is_some_and(anchored)
}

/// JSON text with `", "` / `": "` separators and ASCII-only output.
fn to_canonical_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
    match value.serialize(&mut serializer) {
        // The formatter only emits ASCII.
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => value.to_string(),
    }
}

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}
