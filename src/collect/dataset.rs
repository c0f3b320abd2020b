//! Collected data, keyed by kind

use crate::kind::KindShape;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Items keyed by parent id
pub type ByParent = BTreeMap<String, Vec<Value>>;

/// One kind's collected value, nested according to its [`KindShape`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KindData {
    Items(Vec<Value>),
    ByParent(ByParent),
    ByRegion(BTreeMap<String, Vec<Value>>),
    ByRegionParent(BTreeMap<String, ByParent>),
}

impl KindData {
    pub fn empty(shape: KindShape) -> Self {
        match shape {
            KindShape::Items => KindData::Items(Vec::new()),
            KindShape::ByParent => KindData::ByParent(BTreeMap::new()),
            KindShape::ByRegion => KindData::ByRegion(BTreeMap::new()),
            KindShape::ByRegionParent => KindData::ByRegionParent(BTreeMap::new()),
        }
    }

    pub fn shape(&self) -> KindShape {
        match self {
            KindData::Items(_) => KindShape::Items,
            KindData::ByParent(_) => KindShape::ByParent,
            KindData::ByRegion(_) => KindShape::ByRegion,
            KindData::ByRegionParent(_) => KindShape::ByRegionParent,
        }
    }

    /// Decode a cached value; the JSON alone cannot tell the map shapes apart
    pub fn from_value(shape: KindShape, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match shape {
            KindShape::Items => KindData::Items(Deserialize::deserialize(value)?),
            KindShape::ByParent => KindData::ByParent(Deserialize::deserialize(value)?),
            KindShape::ByRegion => KindData::ByRegion(Deserialize::deserialize(value)?),
            KindShape::ByRegionParent => {
                KindData::ByRegionParent(Deserialize::deserialize(value)?)
            }
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// True when no container level holds anything
    pub fn is_empty(&self) -> bool {
        match self {
            KindData::Items(items) => items.is_empty(),
            KindData::ByParent(map) => map.is_empty(),
            KindData::ByRegion(map) => map.is_empty(),
            KindData::ByRegionParent(map) => map.is_empty(),
        }
    }

    /// Every leaf item, in key order
    pub fn items(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            KindData::Items(items) => Box::new(items.iter()),
            KindData::ByParent(map) | KindData::ByRegion(map) => {
                Box::new(map.values().flatten())
            }
            KindData::ByRegionParent(map) => {
                Box::new(map.values().flat_map(|parents| parents.values().flatten()))
            }
        }
    }

    /// Leaf items of one region; global kinds ignore the region
    pub fn items_in(&self, region: &str) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            KindData::Items(_) | KindData::ByParent(_) => self.items(),
            KindData::ByRegion(map) => Box::new(map.get(region).into_iter().flatten()),
            KindData::ByRegionParent(map) => Box::new(
                map.get(region)
                    .into_iter()
                    .flat_map(|parents| parents.values().flatten()),
            ),
        }
    }

    /// Items of a flat global kind
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            KindData::Items(items) => Some(items),
            _ => None,
        }
    }

    /// Items of a regional kind in one region
    pub fn region(&self, region: &str) -> Option<&[Value]> {
        match self {
            KindData::ByRegion(map) => map.get(region).map(Vec::as_slice),
            _ => None,
        }
    }

    /// Items fanned out from `parent` (global fan-out kinds)
    pub fn parent(&self, parent: &str) -> Option<&[Value]> {
        match self {
            KindData::ByParent(map) => map.get(parent).map(Vec::as_slice),
            _ => None,
        }
    }
}

/// The collector's output: kind name -> collected value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Dataset {
    kinds: BTreeMap<String, KindData>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: &str, data: KindData) {
        self.kinds.insert(kind.to_string(), data);
    }

    pub fn get(&self, kind: &str) -> Option<&KindData> {
        self.kinds.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KindData)> {
        self.kinds.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_respects_shape() {
        let value = json!({"us-east-1": {"vpc-1": [{"Id": "a"}]}});
        let data = KindData::from_value(KindShape::ByRegionParent, value.clone()).unwrap();
        assert_eq!(data.shape(), KindShape::ByRegionParent);
        assert_eq!(data.to_value(), value);

        // Same JSON cannot be read as a flat list
        assert!(KindData::from_value(KindShape::Items, value).is_err());
    }

    #[test]
    fn test_items_in_restricts_regional_kinds() {
        let data = KindData::from_value(
            KindShape::ByRegion,
            json!({"us-east-1": [1, 2], "eu-west-1": [3]}),
        )
        .unwrap();
        assert_eq!(data.items_in("eu-west-1").count(), 1);
        assert_eq!(data.items_in("ap-south-1").count(), 0);
        assert_eq!(data.items().count(), 3);
    }

    #[test]
    fn test_dataset_serializes_as_nested_map() {
        let mut dataset = Dataset::new();
        dataset.insert("regions", KindData::Items(vec![json!({"RegionName": "us-east-1"})]));
        assert_eq!(
            dataset.to_json(),
            json!({"regions": [{"RegionName": "us-east-1"}]})
        );
    }
}
