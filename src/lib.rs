//! cloudshare
//!
//! Dependency-ordered, cached inventory collection over a paginated cloud
//! RPC, plus stable capacity-bounded grouping of the collected items into
//! shares.

pub mod api;
pub mod cache;
pub mod collect;
pub mod config;
pub mod error;
pub mod fetch;
pub mod kind;
pub mod rebalance;
pub mod share;

pub use api::{ApiClient, Envelope, HttpApiClient, OperationRef};
pub use cache::CacheStore;
pub use collect::{CollectOptions, Collector, Dataset, KindData};
pub use error::{ApiError, CacheError, CollectError, RebalanceError};
pub use fetch::{CancelHandle, CancelSignal, PagedFetcher};
pub use kind::{default_registry, schedule, Kind, KindRegistry};
pub use rebalance::{Grouping, Rebalance, Strategy};
