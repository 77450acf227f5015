//! HTTP client for the TaskHub API.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;

/// Response envelope matching the server: `{code, message, data}` with
/// `code=0` on success.
#[derive(Debug, serde::Deserialize)]
pub struct Envelope {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("failed to create http client")?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), token })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn unwrap_envelope(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body: Value = resp.json().await.context("response was not json")?;
        let envelope: Envelope = serde_json::from_value(body.clone())
            .with_context(|| format!("unexpected response shape: {body}"))?;
        if envelope.code != 0 {
            bail!("api error (http {}, code {}): {}", status, envelope.code, envelope.message);
        }
        Ok(envelope.data)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let resp = self.request(reqwest::Method::GET, path).send().await.with_context(|| format!("GET {path}"))?;
        Self::unwrap_envelope(resp).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::unwrap_envelope(resp).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        let resp =
            self.request(reqwest::Method::DELETE, path).send().await.with_context(|| format!("DELETE {path}"))?;
        Self::unwrap_envelope(resp).await
    }
}
