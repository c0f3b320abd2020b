//! HTTP transport for the provider RPC
//!
//! Each call is a `POST {endpoint}/{service}/{operation}` carrying the request
//! parameters as a JSON body; the response body is the envelope.

use super::{ApiClient, Envelope, OperationRef};
use crate::error::ApiError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header carrying the target region of a call
pub const REGION_HEADER: &str = "x-cloudshare-region";

/// Header carrying the credentials profile of a call
pub const PROFILE_HEADER: &str = "x-cloudshare-profile";

/// Truncate a response body for logging and drop non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client for a JSON RPC gateway in front of the provider
#[derive(Clone)]
pub struct HttpApiClient {
    client: Client,
    endpoint: Url,
    profile: String,
}

impl HttpApiClient {
    /// Create a new client for `endpoint`, signing calls as `profile`
    pub fn new(endpoint: &str, profile: &str) -> Result<Self> {
        let mut endpoint = Url::parse(endpoint).context("Invalid API endpoint URL")?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("cloudshare/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            profile: profile.to_string(),
        })
    }

    /// URL of one operation
    pub fn operation_url(&self, operation: &OperationRef) -> Result<Url, url::ParseError> {
        self.endpoint.join(&format!(
            "{}/{}",
            urlencoding::encode(&operation.service),
            urlencoding::encode(&operation.command)
        ))
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn call(
        &self,
        operation: &OperationRef,
        region: &str,
        params: &Envelope,
    ) -> Result<Envelope, ApiError> {
        let url = self
            .operation_url(operation)
            .map_err(|e| ApiError::Service(format!("invalid operation URL: {}", e)))?;

        tracing::debug!("POST {} region={}", url, region);

        let response = self
            .client
            .post(url)
            .header(REGION_HEADER, region)
            .header(PROFILE_HEADER, &self.profile)
            .json(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: sanitize_for_log(&body),
            });
        }

        match serde_json::from_str::<Value>(&body)? {
            Value::Object(map) => Ok(map),
            _ => Err(ApiError::NotAnObject),
        }
    }
}

/// Format an API error for display
pub fn format_api_error(error: &ApiError) -> String {
    match error {
        ApiError::Status { status: 401, .. } => {
            "Authentication failed. Check the credentials profile.".to_string()
        }
        ApiError::Status { status: 403, .. } => {
            "Permission denied. Check the profile's IAM permissions.".to_string()
        }
        ApiError::Status { status: 404, .. } => "Operation not found.".to_string(),
        ApiError::Status { status: 429, .. } => {
            "Rate limit exceeded. Please try again later.".to_string()
        }
        ApiError::Status { status: 400, .. } => {
            "Invalid request. Check the kind's parameters.".to_string()
        }
        ApiError::Status { status, .. } if *status >= 500 => {
            "Service temporarily unavailable in this region.".to_string()
        }
        ApiError::Timeout(after) => format!("No response within {}s.", after.as_secs()),
        other => {
            let text = other.to_string();
            let sanitized: String = text
                .chars()
                .filter(|c| c.is_ascii_graphic() || *c == ' ')
                .take(80)
                .collect();

            if sanitized.len() < text.len() {
                format!("{}...", sanitized)
            } else {
                sanitized
            }
        }
    }
}
