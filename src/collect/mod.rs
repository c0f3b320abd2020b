//! Collector
//!
//! Walks the scheduled kinds, loads each from the cache or fetches it, and
//! assembles the [`Dataset`].
//!
//! # Architecture
//!
//! - [`dataset`] - Nested per-kind values
//! - [`lookup`] - Identity lookups over a collected dataset
//!
//! A kind's calls (one per region and/or parent) are independent and run
//! concurrently on a bounded pool; kinds themselves run strictly one after
//! another so that fan-out rules always read completed parent data.

pub mod dataset;
pub mod lookup;

pub use dataset::{Dataset, KindData};
pub use lookup::{identity_of, lookup_path, match_tag, short_name};

use crate::api::ApiClient;
use crate::cache::CacheStore;
use crate::error::CollectError;
use crate::fetch::{CancelSignal, FetchRequest, PagedFetcher, Scope};
use crate::kind::{schedule, Kind, KindRegistry, KindShape, RegionSource};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default number of concurrent calls per kind
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Knobs for one collection run
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Credentials profile; also namespaces the cache
    pub profile: String,
    /// Region used for global kinds
    pub home_region: String,
    pub concurrency: usize,
    /// Per-call limit, passed through to every remote call
    pub call_timeout: Option<Duration>,
}

impl CollectOptions {
    pub fn new(profile: &str, home_region: &str) -> Self {
        Self {
            profile: profile.to_string(),
            home_region: home_region.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: None,
        }
    }
}

/// One planned call chain of a kind
#[derive(Debug)]
struct Call {
    region: Option<String>,
    parent: Option<String>,
    request: FetchRequest,
}

/// Builds a [`Dataset`] from a [`KindRegistry`]
pub struct Collector {
    client: Arc<dyn ApiClient>,
    cache: Option<CacheStore>,
    options: CollectOptions,
    cancel: CancelSignal,
}

impl Collector {
    pub fn new(client: Arc<dyn ApiClient>, cache: Option<CacheStore>, options: CollectOptions) -> Self {
        Self {
            client,
            cache,
            options,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &CollectOptions {
        &self.options
    }

    /// Collect every kind of `registry`.
    ///
    /// On success every kind has an entry, possibly empty. Fatal errors abort
    /// the run; the kind in flight is never cached.
    pub async fn collect(&self, registry: &KindRegistry) -> Result<Dataset, CollectError> {
        let order = schedule(registry)?;
        let run_id = Uuid::new_v4();
        tracing::info!(
            "Collection run {} for profile {}: {} kinds",
            run_id,
            self.options.profile,
            order.len()
        );

        let fetcher = PagedFetcher::new(self.client.clone(), &self.options.home_region)
            .with_timeout(self.options.call_timeout)
            .with_cancel(self.cancel.clone());

        let mut dataset = Dataset::new();
        for name in &order {
            let kind = registry
                .get(name)
                .ok_or_else(|| CollectError::UnknownKind(name.clone()))?;

            if let Some(cached) = self.load_cached(kind) {
                tracing::debug!("{}: loaded from cache", name);
                dataset.insert(name, cached);
                continue;
            }

            let data = self.collect_kind(&fetcher, registry, kind, &dataset).await?;

            // Empty values are not persisted so the next run retries them
            if let Some(cache) = &self.cache {
                if !data.is_empty() {
                    cache.save(&self.options.profile, name, &data.to_value())?;
                }
            }

            tracing::info!("{}: collected {} items", name, data.items().count());
            dataset.insert(name, data);
        }

        tracing::info!("Collection run {} complete", run_id);
        Ok(dataset)
    }

    fn load_cached(&self, kind: &Kind) -> Option<KindData> {
        let value = self.cache.as_ref()?.load(&self.options.profile, &kind.name)?;
        match KindData::from_value(kind.shape(), value) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("Ignoring cache entry for {}: wrong shape: {}", kind.name, e);
                None
            }
        }
    }

    async fn collect_kind(
        &self,
        fetcher: &PagedFetcher,
        registry: &KindRegistry,
        kind: &Kind,
        dataset: &Dataset,
    ) -> Result<KindData, CollectError> {
        let regions = if kind.global {
            Vec::new()
        } else {
            region_list(registry, dataset)?
        };
        let calls = plan_calls(kind, &regions, dataset);
        tracing::debug!("{}: {} calls planned", kind.name, calls.len());

        let concurrency = self.options.concurrency.max(1);
        let results: Vec<(Call, Vec<Value>)> = futures::stream::iter(calls)
            .map(|call| async move {
                let items = match fetcher.fetch(kind, call.request.clone()).await {
                    Ok(items) => items,
                    Err(e) if !e.is_fatal() => {
                        if let CollectError::RegionUnsupported { source, .. } = &e {
                            tracing::warn!(
                                "{} (non-fatal; {})",
                                e,
                                crate::api::format_api_error(source)
                            );
                        }
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };
                Ok((call, items))
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        Ok(assemble(kind, &regions, results))
    }
}

/// Regions to visit for regional kinds
fn region_list(registry: &KindRegistry, dataset: &Dataset) -> Result<Vec<String>, CollectError> {
    match registry.regions() {
        RegionSource::Static(regions) => Ok(regions.clone()),
        RegionSource::Kind { kind, field } => {
            if !dataset.contains(kind) {
                return Err(CollectError::MissingRegions(format!(
                    "region source {} has not been collected",
                    kind
                )));
            }
            Ok(dataset.identities(kind, None, field))
        }
    }
}

/// Expand a kind into its call chains, in deterministic order
fn plan_calls(kind: &Kind, regions: &[String], dataset: &Dataset) -> Vec<Call> {
    let fan_out = kind.fan_out_edge();
    let mut calls = Vec::new();

    let parents_of = |parent_kind: &str, region: Option<&str>| -> Vec<&Value> {
        match (dataset.get(parent_kind), region) {
            (Some(data), Some(region)) => data.region(region).unwrap_or_default().iter().collect(),
            (Some(data), None) => data.as_items().unwrap_or_default().iter().collect(),
            (None, _) => Vec::new(),
        }
    };

    let scopes: Vec<Option<&String>> = if kind.global {
        vec![None]
    } else {
        regions
            .iter()
            .filter(|r| !kind.skip_regions.contains(*r))
            .map(Some)
            .collect()
    };

    for region in scopes {
        let scope = match region {
            Some(region) => Scope::Region(region.clone()),
            None => Scope::Global,
        };

        match fan_out {
            None => calls.push(Call {
                region: region.cloned(),
                parent: None,
                request: FetchRequest::new(kind, scope),
            }),
            Some((parent_kind, rule)) => {
                let mut seen = std::collections::BTreeSet::new();
                for parent in parents_of(parent_kind, region.map(String::as_str)) {
                    let Some(parent_id) = rule.parent_id(parent) else {
                        continue;
                    };
                    if !seen.insert(parent_id.clone()) {
                        continue;
                    }
                    calls.push(Call {
                        region: region.cloned(),
                        parent: Some(parent_id.clone()),
                        request: FetchRequest::new(kind, scope.clone())
                            .with_param(&rule.param, Value::String(parent_id)),
                    });
                }
            }
        }
    }

    calls
}

/// Nest call results according to the kind's shape.
/// Every visited (and skipped) region gets an entry, possibly empty.
fn assemble(kind: &Kind, regions: &[String], results: Vec<(Call, Vec<Value>)>) -> KindData {
    let mut data = KindData::empty(kind.shape());

    match &mut data {
        KindData::ByRegion(map) => {
            for region in regions {
                map.insert(region.clone(), Vec::new());
            }
        }
        KindData::ByRegionParent(map) => {
            for region in regions {
                map.insert(region.clone(), BTreeMap::new());
            }
        }
        _ => {}
    }

    for (call, items) in results {
        match (&mut data, call.region, call.parent) {
            (KindData::Items(all), _, _) => all.extend(items),
            (KindData::ByParent(map), _, Some(parent)) => {
                map.entry(parent).or_default().extend(items)
            }
            (KindData::ByRegion(map), Some(region), _) => {
                map.entry(region).or_default().extend(items)
            }
            (KindData::ByRegionParent(map), Some(region), Some(parent)) => map
                .entry(region)
                .or_default()
                .entry(parent)
                .or_default()
                .extend(items),
            _ => {}
        }
    }

    if kind.shape() != KindShape::Items {
        tracing::trace!("{}: assembled {:?}", kind.name, data.shape());
    }
    data
}
