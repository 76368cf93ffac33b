use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use shared::error::ApiError;

use crate::mutation::ResourceWriter;

/// Supplies the bearer credential attached to outbound REST calls. Token
/// storage itself is owned by the embedding application.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Thin typed client for the dashboard's REST resources. The request-cache
/// layer above it is external; this only does the round trips the optimistic
/// stores need.
pub struct RestClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = self.tokens.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute_json(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await.context("rest request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(anyhow!(api_error));
            }
            return Err(anyhow!("rest request failed with status {status}: {body}"));
        }
        response.json().await.context("invalid rest response body")
    }

    pub async fn fetch(&self, path: &str) -> Result<Value> {
        self.execute_json(self.request(Method::GET, path)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.execute_json(self.request(Method::PUT, path).json(body))
            .await
    }
}

/// `ResourceWriter` over one REST resource path, reused for preferences and
/// trust overrides.
pub struct RestResourceWriter {
    rest: Arc<RestClient>,
    path: &'static str,
}

impl RestResourceWriter {
    pub fn new(rest: Arc<RestClient>, path: &'static str) -> Self {
        Self { rest, path }
    }
}

#[async_trait]
impl ResourceWriter<Value> for RestResourceWriter {
    async fn write(&self, value: &Value) -> Result<Value> {
        self.rest.put(self.path, value).await
    }
}

pub const PREFERENCES_PATH: &str = "/api/preferences";
pub const TRUST_OVERRIDES_PATH: &str = "/api/trust-overrides";

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
