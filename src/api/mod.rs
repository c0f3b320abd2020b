//! Remote API interaction module
//!
//! The provider API is modelled as an abstract paginated RPC: one call takes a
//! service, an operation and a JSON parameter object, and returns a response
//! envelope (a JSON object holding pagination metadata plus one payload array).
//!
//! # Module Structure
//!
//! - [`http`] - JSON-over-HTTP implementation of [`ApiClient`]
//! - [`callback`] - Custom-resource response envelope and delivery
//!
//! # Example
//!
//! ```ignore
//! use cloudshare::api::{ApiClient, HttpApiClient, OperationRef};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = HttpApiClient::new("https://gateway.internal/", "prod")?;
//!     let op = OperationRef::new("ec2", "describe_regions");
//!     let envelope = client.call(&op, "us-east-1", &Default::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod http;

use crate::error::ApiError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub use http::{format_api_error, HttpApiClient};

/// A response envelope, or the parameter bag of a request
pub type Envelope = Map<String, Value>;

/// Identifies one remote operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct OperationRef {
    pub service: String,
    pub command: String,
}

impl OperationRef {
    pub fn new(service: &str, command: &str) -> Self {
        Self {
            service: service.to_string(),
            command: command.to_string(),
        }
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.command)
    }
}

/// One page-sized call against the provider
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn call(
        &self,
        operation: &OperationRef,
        region: &str,
        params: &Envelope,
    ) -> Result<Envelope, ApiError>;
}

#[async_trait]
impl<T: ApiClient + ?Sized> ApiClient for Arc<T> {
    async fn call(
        &self,
        operation: &OperationRef,
        region: &str,
        params: &Envelope,
    ) -> Result<Envelope, ApiError> {
        (**self).call(operation, region, params).await
    }
}
