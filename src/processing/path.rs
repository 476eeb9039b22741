//! Dot-path field resolution over decoded responses
//!
//! Decoded responses are loosely typed JSON trees. A configured path such as
//! `Features.ValvePosition.Properties.Status.Valid` is walked one segment at a
//! time; each segment is matched against the object keys at that level by exact
//! name, then case-insensitively, then through the alias table.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Resolves dot-separated paths against a decoded response tree
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    /// Lower-cased field name -> lower-cased wire names it may appear under
    aliases: HashMap<String, Vec<String>>,
}

impl PathResolver {
    /// Resolver with no alias table (exact and case-insensitive matching only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with an explicit alias table of `field name -> wire name`
    pub fn with_aliases<I, K, V>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table: HashMap<String, Vec<String>> = HashMap::new();
        for (name, wire) in aliases {
            table
                .entry(name.as_ref().to_lowercase())
                .or_default()
                .push(wire.as_ref().to_lowercase());
        }
        Self { aliases: table }
    }

    /// Resolve `path` against `root`.
    ///
    /// Returns `None` when a segment is missing, when a non-object is reached
    /// with segments remaining, or when the terminal value is `null`.
    pub fn resolve<'a>(&self, root: &'a Value, path: &str) -> Option<&'a Value> {
        let mut current = root;
        for segment in path.split('.') {
            let fields = match current {
                Value::Object(map) => map,
                _ => return None,
            };
            current = self.lookup(fields, segment)?;
            if current.is_null() {
                return None;
            }
        }

        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    fn lookup<'a>(&self, fields: &'a Map<String, Value>, segment: &str) -> Option<&'a Value> {
        if let Some(value) = fields.get(segment) {
            return Some(value);
        }

        let wanted = segment.to_lowercase();
        if let Some((_, value)) = fields.iter().find(|(key, _)| key.to_lowercase() == wanted) {
            return Some(value);
        }

        let wire_names = self.aliases.get(&wanted)?;
        fields
            .iter()
            .find(|(key, _)| {
                let key = key.to_lowercase();
                wire_names.iter().any(|wire| *wire == key)
            })
            .map(|(_, value)| value)
    }
}

/// Resolve with a resolver that has no alias table
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    PathResolver::new().resolve(root, path)
}
