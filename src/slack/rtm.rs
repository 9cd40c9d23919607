use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::slack::web_api::{ApiError, WebApiClient};
use crate::slack::ChatEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Connected,
    Closed,
    Failed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "the initial setup failed: {0}. Please make sure your Slack API key is correct"
    )]
    Handshake(String),
    #[error("the initial setup failed: {0}")]
    Api(#[from] ApiError),
    #[error("websocket connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("gave up reconnecting after {0} attempt(s)")]
    ReconnectExhausted(u32),
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    ok: bool,
    url: Option<String>,
}

/// What to do once a connected stream closes
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            enabled: config.enabled,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

/// A Slack Real Time Messaging session
pub struct RtmSession {
    api: Arc<WebApiClient>,
    connect_timeout: Duration,
    reconnect: ReconnectPolicy,
    state: Arc<RwLock<SessionState>>,
}

impl RtmSession {
    pub fn new(api: Arc<WebApiClient>, connect_timeout: Duration, reconnect: ReconnectPolicy) -> Self {
        Self {
            api,
            connect_timeout,
            reconnect,
            state: Arc::new(RwLock::new(SessionState::Idle)),
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        debug!("RTM session -> {:?}", state);
        *self.state.write().await = state;
    }

    /// Handshake, connect and feed every decoded frame to `handler` in arrival order.
    ///
    /// Returns `Ok(())` when the stream closes and reconnecting is disabled. A
    /// failure before the first connection is always fatal.
    pub async fn listen<F>(&self, mut handler: F) -> Result<(), SessionError>
    where
        F: FnMut(ChatEvent) + Send,
    {
        let mut connected_once = false;
        let mut attempt = 0u32;

        loop {
            match self.connect().await {
                Ok(stream) => {
                    connected_once = true;
                    attempt = 0;
                    info!("Connected to Slack real time messaging");
                    self.pump(stream, &mut handler).await;
                    self.set_state(SessionState::Closed).await;
                    info!("Slack real time messaging stream closed");
                }
                Err(e) => {
                    self.set_state(SessionState::Failed).await;
                    if !connected_once || !self.reconnect.enabled {
                        return Err(e);
                    }
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                }
            }

            if !self.reconnect.enabled {
                return Ok(());
            }

            attempt += 1;
            if self.reconnect.exhausted(attempt) {
                return Err(SessionError::ReconnectExhausted(attempt - 1));
            }
            let delay = self.reconnect.delay_for(attempt);
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;
        }
    }

    async fn handshake(&self) -> Result<String, SessionError> {
        let value = self.api.rtm_start().await?;
        let response: HandshakeResponse =
            serde_json::from_value(value).map_err(|e| SessionError::Handshake(e.to_string()))?;

        if !response.ok {
            return Err(SessionError::Handshake("rtm.start did not return ok".to_string()));
        }
        response
            .url
            .ok_or_else(|| SessionError::Handshake("rtm.start returned no url".to_string()))
    }

    async fn connect(&self) -> Result<WsStream, SessionError> {
        self.set_state(SessionState::Handshaking).await;
        let url = self.handshake().await?;

        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SessionError::Connect {
                url: url.clone(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| SessionError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        self.set_state(SessionState::Connected).await;
        Ok(stream)
    }

    async fn pump<F>(&self, mut stream: WsStream, handler: &mut F)
    where
        F: FnMut(ChatEvent) + Send,
    {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match ChatEvent::parse(&text) {
                    Ok(event) => handler(event),
                    Err(e) => warn!("Skipping undecodable frame: {}", e),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Close frame received: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Slack real time messaging stream error: {}", e);
                    break;
                }
            }
        }
    }
}
