use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::catalog::ModelCatalogClient;
use crate::config::BackendConfig;
use crate::conversion::ConversionClient;
use crate::error::{ConverterError, Result};
use crate::models::{ConversionRecord, ConversionRequest, ConversionResult, ModelDescriptor};

/// Backend banner from `GET {base}/api/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiInfo {
    pub message: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    success: bool,
    #[serde(default)]
    data: Vec<ConversionRecord>,
}

/// Trait representing the conversion backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Base URL requests are sent to.
    fn base_url(&self) -> &str;

    /// Fetch the model catalog.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;

    /// Convert one prompt.
    async fn convert(&self, request: &ConversionRequest) -> ConversionResult;

    /// Most recent conversions, newest first.
    async fn recent_conversions(&self, limit: usize) -> Result<Vec<ConversionRecord>>;

    /// Backend name and version.
    async fn api_info(&self) -> Result<ApiInfo>;
}

/// HTTP implementation over a single shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    catalog: ModelCatalogClient,
    conversion: ConversionClient,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ConverterError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            catalog: ModelCatalogClient::new(client.clone(), &base_url),
            conversion: ConversionClient::new(client.clone(), &base_url),
            client,
            base_url,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConverterError::Backend(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConverterError::Backend(format!("backend returned {}", status)));
        }

        resp.json()
            .await
            .map_err(|e| ConverterError::Backend(format!("invalid response: {}", e)))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        self.catalog.list_models().await
    }

    async fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        self.conversion.convert(request).await
    }

    async fn recent_conversions(&self, limit: usize) -> Result<Vec<ConversionRecord>> {
        let url = format!("{}/api/conversions?limit={}", self.base_url, limit);
        let body: HistoryResponse = self.get_json(&url).await?;
        if !body.success {
            return Err(ConverterError::Backend("backend reported failure".to_string()));
        }
        Ok(body.data)
    }

    async fn api_info(&self) -> Result<ApiInfo> {
        let url = format!("{}/api/", self.base_url);
        self.get_json(&url).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{spawn_backend, unreachable_url};
    use super::*;
    use axum::{Json, Router, extract::Query, routing::get};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_api_info() {
        let app = Router::new().route(
            "/api/",
            get(|| async { Json(json!({"message": "Emergent Prompt Converter API", "version": "1.0.0"})) }),
        );
        let base = spawn_backend(app).await;

        let backend = HttpBackend::with_client(Client::new(), &format!("{}/", base));
        let info = backend.api_info().await.unwrap();
        assert_eq!(info.version.as_deref(), Some("1.0.0"));
        assert_eq!(backend.base_url(), base);
    }

    #[tokio::test]
    async fn test_recent_conversions_passes_limit() {
        let app = Router::new().route(
            "/api/conversions",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(0);
                let data: Vec<_> = (0..limit)
                    .map(|i| json!({"originalPrompt": format!("prompt {}", i), "model": "gpt-4"}))
                    .collect();
                Json(json!({"success": true, "data": data}))
            }),
        );
        let base = spawn_backend(app).await;

        let backend = HttpBackend::with_client(Client::new(), &base);
        let records = backend.recent_conversions(3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].original_prompt.as_deref(), Some("prompt 2"));
    }

    #[tokio::test]
    async fn test_history_failure_is_backend_error() {
        let base = unreachable_url().await;
        let backend = HttpBackend::with_client(Client::new(), &base);
        let err = backend.recent_conversions(10).await.unwrap_err();
        assert!(matches!(err, ConverterError::Backend(_)));
    }

    #[test]
    fn test_timeout_config_builds_client() {
        let config = BackendConfig {
            base_url: "http://localhost:8001/".to_string(),
            timeout_secs: Some(30),
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8001");
    }
}
