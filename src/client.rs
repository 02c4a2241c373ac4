//! HTTP transport to the story backend.
//!
//! Thin wrapper over `reqwest` that knows the backend's failure convention:
//! any non-2xx response has its body read as plain text and surfaced as
//! [`StoryError::Remote`], so the message the backend wrote is the message
//! the user sees. Everything else that goes wrong on the wire becomes
//! [`StoryError::Transport`].

use crate::config::StoryConfig;
use crate::error::StoryError;
use reqwest::multipart::Form;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const HELLO_PATH: &str = "/api/hello";
pub const EVALUATE_PATH: &str = "/api/evaluate-story";

/// Client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &StoryConfig) -> Result<Self, StoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(concat!("img2story/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoryError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a multipart form; returns the response only if it is 2xx.
    pub async fn post_multipart(
        &self,
        stage: &'static str,
        path: &str,
        form: Form,
    ) -> Result<reqwest::Response, StoryError> {
        let url = self.url(path);
        debug!("{}: POST {} (multipart)", stage, url);
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoryError::transport(stage, e))?;
        check_status(stage, response).await
    }

    /// POST a JSON body; returns the response only if it is 2xx.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        stage: &'static str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, StoryError> {
        let url = self.url(path);
        debug!("{}: POST {} (json)", stage, url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| StoryError::transport(stage, e))?;
        check_status(stage, response).await
    }

    /// POST a url-encoded form; returns the response only if it is 2xx.
    pub async fn post_form<F: Serialize + ?Sized>(
        &self,
        stage: &'static str,
        path: &str,
        form: &F,
    ) -> Result<reqwest::Response, StoryError> {
        let url = self.url(path);
        debug!("{}: POST {} (form)", stage, url);
        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| StoryError::transport(stage, e))?;
        check_status(stage, response).await
    }

    /// `GET /api/hello` — cheap reachability check.
    pub async fn ping(&self) -> Result<String, StoryError> {
        const STAGE: &str = "hello";
        let url = self.url(HELLO_PATH);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| StoryError::transport(STAGE, e))?;
        let response = check_status(STAGE, response).await?;
        let hello: HelloResponse = read_json(STAGE, response).await?;
        Ok(hello.message)
    }

    /// `POST /api/evaluate-story` — coherence/flow metrics for a story.
    pub async fn evaluate_story(&self, story: &str) -> Result<serde_json::Value, StoryError> {
        const STAGE: &str = "evaluate";
        let url = self.url(EVALUATE_PATH);
        let response = self
            .http
            .post(&url)
            .form(&[("story", story)])
            .send()
            .await
            .map_err(|e| StoryError::transport(STAGE, e))?;
        let response = check_status(STAGE, response).await?;
        let body: EvaluateResponse = read_json(STAGE, response).await?;
        Ok(body.evaluation)
    }
}

#[derive(Debug, Deserialize)]
struct HelloResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    evaluation: serde_json::Value,
}

/// Turn a non-2xx response into [`StoryError::Remote`] carrying its body text.
async fn check_status(
    stage: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, StoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .map_err(|e| StoryError::transport(stage, e))?;
    warn!("{}: HTTP {} — {}", stage, status.as_u16(), body);
    Err(StoryError::Remote {
        stage,
        status: status.as_u16(),
        body,
    })
}

/// Decode a JSON response body.
pub async fn read_json<T: DeserializeOwned>(
    stage: &'static str,
    response: reqwest::Response,
) -> Result<T, StoryError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StoryError::transport(stage, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoryError::transport(stage, e))
}

/// Read a binary response body together with its content type.
pub async fn read_binary(
    stage: &'static str,
    response: reqwest::Response,
    fallback_mime: &str,
) -> Result<(Vec<u8>, String), StoryError> {
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback_mime)
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StoryError::transport(stage, e))?;
    Ok((bytes.to_vec(), mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_base_and_path() {
        let config = StoryConfig::builder()
            .base_url("http://backend:9000/")
            .build()
            .unwrap();
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.url(HELLO_PATH), "http://backend:9000/api/hello");
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Port 9 (discard) is essentially never listening on loopback.
        let config = StoryConfig::builder()
            .base_url("http://127.0.0.1:9")
            .connect_timeout_secs(2)
            .build()
            .unwrap();
        let client = ApiClient::new(&config).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, StoryError::Transport { stage: "hello", .. }), "got: {err:?}");
    }
}
