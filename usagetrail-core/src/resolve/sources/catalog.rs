//! Remote catalog backend
//!
//! Sends every bundle id in one request and receives display names back.
//!
//! ```text
//! POST {endpoint}
//! {"bundle_ids": ["com.example.app", "com.apple.Maps"]}
//!
//! 200 OK
//! {"com.example.app": "Example App", "com.apple.Maps": "Maps"}
//! ```
//!
//! The catalog only knows bundle ids, so identities from this backend are
//! keyed by bundle id. The resolver feeds it bundle ids taken from the local
//! mapping at `lookup.path` and keys the names back by AdamID.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::config::{CatalogConfig, LookupKind};
use crate::error::{Error, Result};
use crate::resolve::{IdentitySource, LookupKey};
use crate::types::AppIdentity;

/// HTTP client for the bundle id catalog
pub struct CatalogClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl CatalogClient {
    /// Create a new catalog client from configuration
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("catalog.endpoint is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid catalog api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Look up display names for a batch of bundle ids.
    pub async fn lookup_names(&self, bundle_ids: &[String]) -> Result<HashMap<String, String>> {
        let request_body = LookupRequest { bundle_ids };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Catalog(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let names: HashMap<String, Option<String>> = response
                .json()
                .await
                .map_err(|e| Error::Catalog(format!("failed to parse response: {}", e)))?;
            Ok(names
                .into_iter()
                .filter_map(|(bundle_id, name)| name.map(|n| (bundle_id, n)))
                .collect())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Catalog(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

/// Request body for the catalog lookup
#[derive(Serialize)]
struct LookupRequest<'a> {
    bundle_ids: &'a [String],
}

/// Blocking identity source over [`CatalogClient`].
pub struct CatalogSource {
    client: CatalogClient,
    runtime: tokio::runtime::Runtime,
}

impl CatalogSource {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = CatalogClient::new(&config)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Catalog(format!("failed to create runtime: {}", e)))?;

        Ok(Self { client, runtime })
    }
}

impl IdentitySource for CatalogSource {
    fn kind(&self) -> LookupKind {
        LookupKind::Catalog
    }

    fn key_space(&self) -> LookupKey {
        LookupKey::BundleId
    }

    fn location(&self) -> String {
        self.client.endpoint().to_string()
    }

    fn lookup(&self, keys: &BTreeSet<String>) -> Result<HashMap<String, AppIdentity>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let bundle_ids: Vec<String> = keys.iter().cloned().collect();
        let names = self.runtime.block_on(self.client.lookup_names(&bundle_ids))?;

        Ok(names
            .into_iter()
            .map(|(bundle_id, name)| {
                let identity = AppIdentity::new(bundle_id.clone(), name, bundle_id.clone());
                (bundle_id, identity)
            })
            .collect())
    }
}
