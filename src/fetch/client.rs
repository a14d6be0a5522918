//! Network primitive used by the agent.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::types::{Request, Response};
use crate::config::NetworkConfig;

/// The request never produced an HTTP response.
///
/// Any HTTP status, including 4xx and 5xx, is a successful fetch; only
/// transport failures end up here.
#[derive(Error, Debug)]
pub enum NetworkError {
  #[error("Network request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Network unavailable: {0}")]
  Unavailable(String),
}

/// Fetches requests from the network.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Maximum redirects followed for one request
const MAX_REDIRECTS: usize = 20;

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder()
      .user_agent(&config.user_agent)
      .redirect(Policy::limited(MAX_REDIRECTS));

    if config.timeout_secs > 0 {
      builder = builder.timeout(Duration::from_secs(config.timeout_secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await?;
    let status = response.status();
    let url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?;

    debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Network response");

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body,
      url: Some(url),
    })
  }
}
