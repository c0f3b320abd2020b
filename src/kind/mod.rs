//! Object kinds
//!
//! A [`Kind`] describes one category of remote object: which operation lists
//! it, whether it is fetched once (global) or once per region, which other
//! kinds it depends on, and how to fan out one call per parent item.
//!
//! # Architecture
//!
//! - [`registry`] - Validated, immutable table of kinds (embedded default or file)
//! - [`schedule`] - Dependency-ordered fetch order
//!
//! # Declaring kinds
//!
//! Kinds are declared in JSON (or YAML) as an ordered array. Dependencies may
//! be bare names or objects carrying a fan-out rule:
//!
//! ```json
//! {
//!   "name": "hosted-zone-associations",
//!   "global": true,
//!   "service": "route53",
//!   "command": "get_hosted_zone",
//!   "cleanup_keys": ["HostedZone"],
//!   "dependencies": [
//!     { "kind": "hosted-zones",
//!       "fan_out": { "param": "Id", "id_field": "Id", "strip_path": true,
//!                    "filter": { "type": "equals", "path": "Config.PrivateZone", "value": true } } }
//!   ]
//! }
//! ```

pub mod registry;
pub mod schedule;

use crate::api::{Envelope, OperationRef};
use crate::collect::lookup::{identity_of, lookup_path, short_name};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub use registry::{default_registry, KindRegistry, RegionSource};
pub use schedule::schedule;

/// Continuation dialect of a paginated operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pagination {
    /// Resolved from the first page of each call chain
    #[default]
    Auto,
    None,
    /// `IsTruncated` + `NextMarker`, continued via request `Marker`
    Marker,
    /// `NextToken` (or `nextToken`), continued under the same name
    Token,
}

impl Pagination {
    /// Pick the dialect an envelope speaks
    pub fn detect(envelope: &Envelope) -> Self {
        if envelope.contains_key("NextToken") || envelope.contains_key("nextToken") {
            Pagination::Token
        } else if envelope.contains_key("NextMarker") || envelope.contains_key("IsTruncated") {
            Pagination::Marker
        } else {
            Pagination::None
        }
    }
}

/// Predicate selecting which parent items get a fan-out call
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentFilter {
    #[default]
    Always,
    /// Value at `path` equals `value`
    Equals { path: String, value: Value },
    #[serde(skip)]
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl ParentFilter {
    pub fn equals(path: &str, value: Value) -> Self {
        ParentFilter::Equals {
            path: path.to_string(),
            value,
        }
    }

    pub fn custom(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        ParentFilter::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, item: &Value) -> bool {
        match self {
            ParentFilter::Always => true,
            ParentFilter::Equals { path, value } => lookup_path(item, path) == Some(value),
            ParentFilter::Custom(predicate) => predicate(item),
        }
    }
}

impl fmt::Debug for ParentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentFilter::Always => write!(f, "Always"),
            ParentFilter::Equals { path, value } => write!(f, "Equals({} == {})", path, value),
            ParentFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Rule for issuing one call per qualifying parent item
#[derive(Debug, Clone, Deserialize)]
pub struct FanOut {
    /// Request parameter receiving the parent identity
    pub param: String,
    /// Dot path of the parent identity
    pub id_field: String,
    /// Keep only the segment after the last `/` of the identity
    #[serde(default)]
    pub strip_path: bool,
    #[serde(default)]
    pub filter: ParentFilter,
}

impl FanOut {
    pub fn new(param: &str, id_field: &str) -> Self {
        Self {
            param: param.to_string(),
            id_field: id_field.to_string(),
            strip_path: false,
            filter: ParentFilter::Always,
        }
    }

    pub fn strip_path(mut self) -> Self {
        self.strip_path = true;
        self
    }

    pub fn filter(mut self, filter: ParentFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Identity of `parent` if it qualifies for a call
    pub fn parent_id(&self, parent: &Value) -> Option<String> {
        if !self.filter.matches(parent) {
            return None;
        }
        let id = identity_of(lookup_path(parent, &self.id_field)?)?;
        if self.strip_path {
            Some(short_name(&id).to_string())
        } else {
            Some(id)
        }
    }
}

/// Edge to another kind, optionally fanning out over its items
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "DependencyDef")]
pub struct Dependency {
    pub kind: String,
    pub fan_out: Option<FanOut>,
}

/// Either declaration dialect: a bare name or a full edge
#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyDef {
    Name(String),
    Edge {
        kind: String,
        #[serde(default)]
        fan_out: Option<FanOut>,
    },
}

impl From<DependencyDef> for Dependency {
    fn from(def: DependencyDef) -> Self {
        match def {
            DependencyDef::Name(kind) => Dependency {
                kind,
                fan_out: None,
            },
            DependencyDef::Edge { kind, fan_out } => Dependency { kind, fan_out },
        }
    }
}

/// How a kind's collected value is nested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindShape {
    /// kind -> items
    Items,
    /// kind -> parent id -> items
    ByParent,
    /// kind -> region -> items
    ByRegion,
    /// kind -> region -> parent id -> items
    ByRegionParent,
}

/// Static descriptor of one object kind
#[derive(Debug, Clone, Deserialize)]
pub struct Kind {
    pub name: String,
    #[serde(default)]
    pub global: bool,
    #[serde(flatten)]
    pub operation: OperationRef,
    /// Identity field used by lookups
    #[serde(default)]
    pub match_field: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Regions where the operation is unsupported
    #[serde(default)]
    pub skip_regions: BTreeSet<String>,
    /// Envelope keys to ignore besides the standard metadata keys
    #[serde(default)]
    pub cleanup_keys: BTreeSet<String>,
    /// Explicit payload key; inferred from the envelope when absent
    #[serde(default)]
    pub payload_key: Option<String>,
    #[serde(default)]
    pub pagination: Pagination,
    /// Parameters sent with every request of this kind
    #[serde(default)]
    pub request_params: Envelope,
}

impl Kind {
    fn new(name: &str, global: bool, service: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            global,
            operation: OperationRef::new(service, command),
            match_field: None,
            dependencies: Vec::new(),
            skip_regions: BTreeSet::new(),
            cleanup_keys: BTreeSet::new(),
            payload_key: None,
            pagination: Pagination::Auto,
            request_params: Envelope::new(),
        }
    }

    /// A kind fetched once from the home region
    pub fn global(name: &str, service: &str, command: &str) -> Self {
        Self::new(name, true, service, command)
    }

    /// A kind fetched once per region
    pub fn regional(name: &str, service: &str, command: &str) -> Self {
        Self::new(name, false, service, command)
    }

    pub fn depends_on(mut self, kind: &str) -> Self {
        self.dependencies.push(Dependency {
            kind: kind.to_string(),
            fan_out: None,
        });
        self
    }

    pub fn fan_out(mut self, parent: &str, fan_out: FanOut) -> Self {
        self.dependencies.push(Dependency {
            kind: parent.to_string(),
            fan_out: Some(fan_out),
        });
        self
    }

    pub fn match_field(mut self, field: &str) -> Self {
        self.match_field = Some(field.to_string());
        self
    }

    pub fn skip_region(mut self, region: &str) -> Self {
        self.skip_regions.insert(region.to_string());
        self
    }

    pub fn cleanup(mut self, key: &str) -> Self {
        self.cleanup_keys.insert(key.to_string());
        self
    }

    pub fn payload_key(mut self, key: &str) -> Self {
        self.payload_key = Some(key.to_string());
        self
    }

    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.request_params.insert(key.to_string(), value);
        self
    }

    /// Names of all kinds this kind depends on, in declaration order
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.kind.as_str())
    }

    /// The fan-out edge, if any: (parent kind, rule)
    pub fn fan_out_edge(&self) -> Option<(&str, &FanOut)> {
        self.dependencies
            .iter()
            .find_map(|d| d.fan_out.as_ref().map(|f| (d.kind.as_str(), f)))
    }

    pub fn shape(&self) -> KindShape {
        match (self.global, self.fan_out_edge().is_some()) {
            (true, false) => KindShape::Items,
            (true, true) => KindShape::ByParent,
            (false, false) => KindShape::ByRegion,
            (false, true) => KindShape::ByRegionParent,
        }
    }
}
