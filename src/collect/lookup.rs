//! Object lookup and item helpers
//!
//! "Not found" is an ordinary outcome here: partially provisioned
//! infrastructure is the steady state, so lookups return `Option`.

use super::dataset::Dataset;
use crate::kind::KindRegistry;
use serde_json::Value;

/// Follow a dot path (`Config.PrivateZone`, `Tags.0.Key`) into a JSON value
pub fn lookup_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;
    for part in path.split('.') {
        current = match (current, part.parse::<usize>()) {
            (Value::Array(arr), Ok(idx)) => arr.get(idx)?,
            _ => current.get(part)?,
        };
    }
    Some(current)
}

/// Identity string of a scalar value
pub fn identity_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Segment after the last `/`
/// e.g., "/hostedzone/Z0123456789" -> "Z0123456789"
pub fn short_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Whether the item's tag `key` contains `needle` (case-insensitive).
/// Tags are `[{"Key": .., "Value": ..}]`.
pub fn match_tag(item: &Value, key: &str, needle: &str) -> bool {
    let Some(tags) = item.get("Tags").and_then(|t| t.as_array()) else {
        return false;
    };
    let needle = needle.to_lowercase();

    tags.iter()
        .find(|tag| tag.get("Key").and_then(|k| k.as_str()) == Some(key))
        .and_then(|tag| tag.get("Value").and_then(|v| v.as_str()))
        .is_some_and(|value| value.to_lowercase().contains(&needle))
}

impl Dataset {
    /// Find one item of `kind` whose match field equals `value`.
    ///
    /// For regional kinds, `Some(region)` restricts the search to that region;
    /// `None` searches every region in order. Global kinds ignore `region`.
    pub fn find(
        &self,
        registry: &KindRegistry,
        kind: &str,
        region: Option<&str>,
        value: &str,
    ) -> Option<&Value> {
        let Some(field) = registry.get(kind).and_then(|k| k.match_field.as_deref()) else {
            tracing::warn!("Kind {} has no match field; lookup skipped", kind);
            return None;
        };

        let found = self.find_by(kind, region, |item| {
            lookup_path(item, field)
                .and_then(identity_of)
                .is_some_and(|id| id == value)
        });

        if found.is_none() {
            tracing::debug!("{} {}={} not found in {:?}", kind, field, value, region);
        }
        found
    }

    /// Find the first item of `kind` accepted by `predicate`
    pub fn find_by<P>(&self, kind: &str, region: Option<&str>, predicate: P) -> Option<&Value>
    where
        P: Fn(&Value) -> bool,
    {
        let data = self.get(kind)?;
        match region {
            Some(region) => data.items_in(region).find(|item| predicate(item)),
            None => data.items().find(|item| predicate(item)),
        }
    }

    /// Identities at `field` of every item of `kind` (optionally one region)
    pub fn identities(&self, kind: &str, region: Option<&str>, field: &str) -> Vec<String> {
        let Some(data) = self.get(kind) else {
            return Vec::new();
        };
        let items: Box<dyn Iterator<Item = &Value> + '_> = match region {
            Some(region) => data.items_in(region),
            None => data.items(),
        };
        items
            .filter_map(|item| lookup_path(item, field).and_then(identity_of))
            .collect()
    }
}
