use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::slack::{Channel, Member};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {method} failed: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} returned HTTP {status}")]
    Status { method: String, status: StatusCode },
    #[error("failed to decode {method} response: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{method} returned ok=false: {error}")]
    Platform { method: String, error: String },
}

/// Client for the Slack Web API: `GET {base}{method}?{params}`
pub struct WebApiClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl WebApiClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        // Url::join drops the last path segment unless the base ends with a slash
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid Slack API base URL: {}", base_url))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    pub fn encoded_url(&self, method: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self
            .base_url
            .join(method)
            .unwrap_or_else(|_| self.base_url.clone());
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        url
    }

    /// Call a Web API method. Responses carrying `ok: false` are errors.
    pub async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let url = self.encoded_url(method, params);
        debug!("Calling Slack method {}", method);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                method: method.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ApiError::Status {
                method: method.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| ApiError::Transport {
                method: method.to_string(),
                source,
            })?;

        let value: Value = serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            method: method.to_string(),
            source,
        })?;

        if value.get("ok").and_then(Value::as_bool) == Some(false) {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(ApiError::Platform {
                method: method.to_string(),
                error,
            });
        }

        Ok(value)
    }

    pub async fn rtm_start(&self) -> Result<Value, ApiError> {
        self.call("rtm.start", &[("token", &self.token)]).await
    }

    /// First page only.
    pub async fn channels_list(&self) -> Result<Vec<Channel>, ApiError> {
        let value = self.call("channels.list", &[("token", &self.token)]).await?;
        field_or_default(value, "channels", "channels.list")
    }

    pub async fn users_list(&self) -> Result<Vec<Member>, ApiError> {
        let value = self.call("users.list", &[("token", &self.token)]).await?;
        field_or_default(value, "members", "users.list")
    }

    /// Accepts both `{ok, user: {...}}` and the flat `{ok, id, name, real_name}` shape.
    pub async fn users_info(&self, user_id: &str) -> Result<Member, ApiError> {
        let mut value = self
            .call("users.info", &[("token", &self.token), ("user", user_id)])
            .await?;
        let member = if value.get("user").is_some_and(Value::is_object) {
            value["user"].take()
        } else {
            value
        };
        serde_json::from_value(member).map_err(|source| ApiError::Decode {
            method: "users.info".to_string(),
            source,
        })
    }
}

fn field_or_default<T>(mut value: Value, field: &str, method: &str) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    match value.get_mut(field) {
        Some(inner) => serde_json::from_value(inner.take()).map_err(|source| ApiError::Decode {
            method: method.to_string(),
            source,
        }),
        None => Ok(T::default()),
    }
}
