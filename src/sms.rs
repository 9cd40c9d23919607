use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::config::TwilioCredentials;

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("failed to reach Twilio: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Twilio rejected message to {to} ({status}): {body}")]
    Rejected {
        to: String,
        status: StatusCode,
        body: String,
    },
}

/// Outbound text messaging
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_message(&self, to: &str, from: &str, body: &str) -> Result<(), SmsError>;
}

pub struct TwilioClient {
    client: reqwest::Client,
    messages_url: String,
    sid: String,
    token: String,
}

impl TwilioClient {
    pub fn new(
        base_url: &str,
        credentials: &TwilioCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                base_url.trim_end_matches('/'),
                credentials.sid
            ),
            sid: credentials.sid.clone(),
            token: credentials.token.clone(),
        })
    }
}

#[async_trait]
impl SmsGateway for TwilioClient {
    async fn send_message(&self, to: &str, from: &str, body: &str) -> Result<(), SmsError> {
        debug!("Sending text to {}", to);

        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth(&self.sid, Some(&self.token))
            .form(&[("To", to), ("From", from), ("Body", body)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Rejected {
                to: to.to_string(),
                status,
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::web_api::tests::spawn_http_server;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<(Option<String>, HashMap<String, String>)>>>;

    async fn record(
        State(received): State<Received>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> (HttpStatus, Json<serde_json::Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let to = form.get("To").cloned().unwrap_or_default();
        received.lock().unwrap().push((auth, form));

        if to == "+15550000000" {
            return (
                HttpStatus::BAD_REQUEST,
                Json(json!({ "code": 21211, "message": "Invalid 'To' Phone Number" })),
            );
        }
        (HttpStatus::CREATED, Json(json!({ "sid": "SM1", "status": "queued" })))
    }

    fn credentials() -> TwilioCredentials {
        TwilioCredentials {
            sid: "AC123".to_string(),
            token: "secret".to_string(),
            phone: "+15551110000".to_string(),
        }
    }

    async fn stub_twilio() -> (TwilioClient, Received, tokio::sync::oneshot::Sender<()>) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route("/2010-04-01/Accounts/AC123/Messages.json", post(record))
            .with_state(Arc::clone(&received));
        let (addr, shutdown) = spawn_http_server(app).await;
        let client = TwilioClient::new(
            &format!("http://{}/", addr),
            &credentials(),
            Duration::from_secs(5),
        )
        .unwrap();
        (client, received, shutdown)
    }

    #[tokio::test]
    async fn test_send_message_posts_form_with_basic_auth() {
        let (client, received, _shutdown) = stub_twilio().await;

        client
            .send_message("+15552223333", "+15551110000", "#general @alice: hi")
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (auth, form) = &received[0];
        assert!(auth.as_deref().unwrap_or_default().starts_with("Basic "));
        assert_eq!(form["To"], "+15552223333");
        assert_eq!(form["From"], "+15551110000");
        assert_eq!(form["Body"], "#general @alice: hi");
    }

    #[tokio::test]
    async fn test_rejected_message_is_an_error() {
        let (client, _received, _shutdown) = stub_twilio().await;

        let err = client
            .send_message("+15550000000", "+15551110000", "hi")
            .await
            .unwrap_err();

        match err {
            SmsError::Rejected { to, status, body } => {
                assert_eq!(to, "+15550000000");
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(body.contains("21211"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }
}
