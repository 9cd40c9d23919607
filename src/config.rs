use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "required credential {0} is empty. Make sure your API keys are filled in correctly \
         (TWILIO_SID, TWILIO_TOKEN, TWILIO_PHONE, SLACK_TOKEN)"
    )]
    MissingCredential(&'static str),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// Team name shown in every notification; omitted when empty.
    pub team_name: String,
    pub keywords: Vec<String>,
    pub ignore_case_keywords: bool,
    /// Channel names to monitor. Empty means all channels.
    pub channels: Vec<String>,
    pub quiet: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            team_name: String::new(),
            keywords: Vec::new(),
            ignore_case_keywords: true,
            channels: Vec::new(),
            quiet: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Contact {
    pub phone: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SlackConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://slack.com/api/".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl SlackConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TwilioConfig {
    pub api_base_url: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.twilio.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            max_attempts: 0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Command-line flags win over the file.
    pub fn apply_cli_overrides(&mut self, team_name: Option<String>, quiet: bool) {
        if let Some(team_name) = team_name {
            self.bridge.team_name = team_name;
        }
        if quiet {
            self.bridge.quiet = true;
        }
    }
}

#[derive(Clone, Default)]
pub struct TwilioCredentials {
    pub sid: String,
    pub token: String,
    pub phone: String,
}

#[derive(Clone, Default)]
pub struct SlackCredentials {
    pub token: String,
}

/// API keys for Twilio and Slack, read once from the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub twilio: TwilioCredentials,
    pub slack: SlackCredentials,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("twilio.sid", &self.twilio.sid)
            .field("twilio.token", &"<redacted>")
            .field("twilio.phone", &self.twilio.phone)
            .field("slack.token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            twilio: TwilioCredentials {
                sid: get("TWILIO_SID"),
                token: get("TWILIO_TOKEN"),
                phone: get("TWILIO_PHONE"),
            },
            slack: SlackCredentials {
                token: get("SLACK_TOKEN"),
            },
        }
    }

    /// Only the Twilio phone and the Slack token are checked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.twilio.phone.is_empty() {
            return Err(ConfigError::MissingCredential("TWILIO_PHONE"));
        }
        if self.slack.token.is_empty() {
            return Err(ConfigError::MissingCredential("SLACK_TOKEN"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> Credentials {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Credentials::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.contacts.is_empty());
        assert!(config.bridge.keywords.is_empty());
        assert!(config.bridge.ignore_case_keywords);
        assert!(!config.bridge.quiet);
        assert_eq!(config.slack.api_base_url, "https://slack.com/api/");
        assert_eq!(config.slack.request_timeout(), Duration::from_secs(30));
        assert!(!config.reconnect.enabled);
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            [bridge]
            team_name = "Acme"
            keywords = ["urgent", "deploy"]
            ignore_case_keywords = false
            channels = ["general", "ops"]

            [[contacts]]
            phone = "+15551234567"

            [[contacts]]
            phone = "+15557654321"

            [reconnect]
            enabled = true
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.bridge.team_name, "Acme");
        assert_eq!(config.bridge.keywords, vec!["urgent", "deploy"]);
        assert!(!config.bridge.ignore_case_keywords);
        assert_eq!(config.bridge.channels, vec!["general", "ops"]);
        assert_eq!(config.contacts.len(), 2);
        assert_eq!(config.contacts[1].phone, "+15557654321");
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
    }

    #[test]
    fn test_contact_without_phone_is_rejected() {
        assert!(Config::parse("[[contacts]]\nname = \"bob\"\n").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::parse("[bridge]\nteam_name = \"Acme\"\n").unwrap();
        config.apply_cli_overrides(None, false);
        assert_eq!(config.bridge.team_name, "Acme");
        assert!(!config.bridge.quiet);

        config.apply_cli_overrides(Some("Globex".to_string()), true);
        assert_eq!(config.bridge.team_name, "Globex");
        assert!(config.bridge.quiet);
    }

    #[test]
    fn test_credentials_from_lookup() {
        let creds = env(&[
            ("TWILIO_SID", "AC123"),
            ("TWILIO_TOKEN", "secret"),
            ("TWILIO_PHONE", "+15550000000"),
            ("SLACK_TOKEN", "xoxb-1"),
        ]);
        assert_eq!(creds.twilio.sid, "AC123");
        assert_eq!(creds.slack.token, "xoxb-1");
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn test_missing_phone_is_fatal() {
        let creds = env(&[("SLACK_TOKEN", "xoxb-1")]);
        assert_eq!(
            creds.validate(),
            Err(ConfigError::MissingCredential("TWILIO_PHONE"))
        );
    }

    #[test]
    fn test_empty_slack_token_is_fatal() {
        let creds = env(&[("TWILIO_PHONE", "+15550000000"), ("SLACK_TOKEN", "")]);
        assert_eq!(
            creds.validate(),
            Err(ConfigError::MissingCredential("SLACK_TOKEN"))
        );
    }

    #[test]
    fn test_only_empty_credentials_are_rejected() {
        let creds = env(&[("TWILIO_PHONE", " "), ("SLACK_TOKEN", " ")]);
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let creds = env(&[("TWILIO_TOKEN", "hunter2"), ("SLACK_TOKEN", "xoxb-secret")]);
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("xoxb-secret"));
    }
}
