use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;

use crate::api::BackendApi;
use crate::error::{ConverterError, Result};
use crate::models::ModelDescriptor;

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    success: bool,
    #[serde(default)]
    data: Vec<ModelDescriptor>,
}

/// Fetches the model catalog from `GET {base}/api/models`.
#[derive(Debug, Clone)]
pub struct ModelCatalogClient {
    client: Client,
    base_url: String,
}

impl ModelCatalogClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Single attempt, no retry. A failed status, a `success: false` body
    /// and an empty list all count as failures.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let url = format!("{}/api/models", self.base_url);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConverterError::CatalogFetch(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConverterError::CatalogFetch(format!("backend returned {}", status)));
        }

        let body: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| ConverterError::CatalogFetch(format!("invalid response: {}", e)))?;

        if !body.success {
            return Err(ConverterError::CatalogFetch("backend reported failure".to_string()));
        }
        if body.data.is_empty() {
            return Err(ConverterError::CatalogFetch("backend returned no models".to_string()));
        }

        debug!("Catalog returned {} models", body.data.len());
        Ok(body.data)
    }
}

/// Built-in catalog used when the backend cannot be reached. Never empty.
pub fn fallback_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gpt-4o-mini", "GPT-4o Mini", "OpenAI")
            .with_description("Fast and efficient model for most tasks"),
        ModelDescriptor::new("gpt-4", "GPT-4", "OpenAI")
            .with_description("Most capable model for complex reasoning"),
        ModelDescriptor::new("claude-3-sonnet", "Claude 3 Sonnet", "Anthropic")
            .with_description("Excellent for analysis and structured thinking"),
        ModelDescriptor::new("gemini-pro", "Gemini Pro", "Google")
            .with_description("Google's advanced model with multimodal capabilities"),
    ]
}

/// Result of loading the catalog once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogOutcome {
    Fetched(Vec<ModelDescriptor>),
    Fallback {
        models: Vec<ModelDescriptor>,
        reason: String,
    },
}

impl CatalogOutcome {
    pub fn into_models(self) -> Vec<ModelDescriptor> {
        match self {
            CatalogOutcome::Fetched(models) => models,
            CatalogOutcome::Fallback { models, .. } => models,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, CatalogOutcome::Fallback { .. })
    }
}

/// Fetch the catalog, substituting `fallback_models()` on any failure.
pub async fn load_catalog(api: &dyn BackendApi) -> CatalogOutcome {
    match api.list_models().await {
        Ok(models) => CatalogOutcome::Fetched(models),
        Err(e) => {
            info!("{}; using built-in model list", e);
            CatalogOutcome::Fallback {
                models: fallback_models(),
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{spawn_backend, unreachable_url, FakeBackend};
    use axum::{Json, Router, http::StatusCode, routing::get};
    use serde_json::json;

    #[test]
    fn test_fallback_is_non_empty_with_unique_ids() {
        let models = fallback_models();
        assert!(!models.is_empty());
        let mut ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), models.len());
    }

    #[tokio::test]
    async fn test_list_models_decodes_catalog() {
        let app = Router::new().route(
            "/api/models",
            get(|| async {
                Json(json!({
                    "success": true,
                    "data": [
                        {"id": "gpt-4", "name": "GPT-4", "provider": "OpenAI",
                         "description": "Most capable", "capabilities": ["analysis"]},
                        {"id": "gemini-pro", "name": "Gemini Pro", "provider": "Google"}
                    ]
                }))
            }),
        );
        let base = spawn_backend(app).await;

        let client = ModelCatalogClient::new(Client::new(), &base);
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gpt-4");
        assert_eq!(models[0].capabilities, vec!["analysis".to_string()]);
        assert_eq!(models[1].display_name, "Gemini Pro");
    }

    #[tokio::test]
    async fn test_list_models_server_error() {
        let app = Router::new().route(
            "/api/models",
            get(|| async {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "Failed to fetch models"})))
            }),
        );
        let base = spawn_backend(app).await;

        let err = ModelCatalogClient::new(Client::new(), &base).list_models().await.unwrap_err();
        assert!(matches!(err, ConverterError::CatalogFetch(_)));
    }

    #[tokio::test]
    async fn test_list_models_reported_failure() {
        let app = Router::new().route(
            "/api/models",
            get(|| async { Json(json!({"success": false, "data": []})) }),
        );
        let base = spawn_backend(app).await;

        let err = ModelCatalogClient::new(Client::new(), &base).list_models().await.unwrap_err();
        assert!(matches!(err, ConverterError::CatalogFetch(_)));
    }

    #[tokio::test]
    async fn test_list_models_transport_failure() {
        let base = unreachable_url().await;
        let err = ModelCatalogClient::new(Client::new(), &base).list_models().await.unwrap_err();
        assert!(matches!(err, ConverterError::CatalogFetch(_)));
    }

    #[tokio::test]
    async fn test_load_catalog_falls_back() {
        let backend = FakeBackend::new().with_catalog_error("connection refused");
        let outcome = load_catalog(&backend).await;

        assert!(outcome.is_fallback());
        assert_eq!(outcome.clone().into_models(), fallback_models());
        match outcome {
            CatalogOutcome::Fallback { reason, .. } => assert!(reason.contains("connection refused")),
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_catalog_fetched() {
        let models = vec![ModelDescriptor::new("gpt-4", "GPT-4", "OpenAI")];
        let backend = FakeBackend::new().with_models(models.clone());
        let outcome = load_catalog(&backend).await;
        assert_eq!(outcome, CatalogOutcome::Fetched(models));
    }
}
