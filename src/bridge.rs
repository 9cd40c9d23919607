use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, ConfigError, Contact, Credentials};
use crate::identity::{ChannelCache, SlackDirectory, UserCache};
use crate::slack::rtm::RtmSession;
use crate::slack::{ChatEvent, NewMessage};
use crate::sms::SmsGateway;

/// What to forward and to whom
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    pub team_name: String,
    pub keywords: Vec<String>,
    pub ignore_case_keywords: bool,
    pub channels: Vec<String>,
    pub contacts: Vec<Contact>,
    pub quiet: bool,
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            team_name: config.bridge.team_name.clone(),
            keywords: config.bridge.keywords.clone(),
            ignore_case_keywords: config.bridge.ignore_case_keywords,
            channels: config.bridge.channels.clone(),
            contacts: config.contacts.clone(),
            quiet: config.bridge.quiet,
        }
    }
}

/// Forwards new Slack messages to every contact as a text message.
pub struct Bridge {
    options: BridgeOptions,
    channel_filter: HashSet<String>,
    /// Already lowercased when matching ignores case.
    keywords: Vec<String>,
    from_phone: String,
    channels: ChannelCache,
    users: UserCache,
    directory: Arc<dyn SlackDirectory>,
    gateway: Arc<dyn SmsGateway>,
}

impl Bridge {
    pub fn new(
        options: BridgeOptions,
        credentials: &Credentials,
        directory: Arc<dyn SlackDirectory>,
        gateway: Arc<dyn SmsGateway>,
    ) -> Result<Self, ConfigError> {
        credentials.validate()?;

        let keywords = options
            .keywords
            .iter()
            .map(|k| {
                if options.ignore_case_keywords {
                    k.to_lowercase()
                } else {
                    k.clone()
                }
            })
            .collect();

        Ok(Self {
            channel_filter: options.channels.iter().cloned().collect(),
            keywords,
            from_phone: credentials.twilio.phone.clone(),
            channels: ChannelCache::new(),
            users: UserCache::new(),
            directory,
            gateway,
            options,
        })
    }

    /// Fill both identity caches, then listen until the session ends.
    pub async fn start(self: Arc<Self>, session: RtmSession) -> Result<()> {
        self.print_intro();

        self.build_channel_cache()
            .await
            .context("Failed to load Slack channels")?;
        self.build_user_cache()
            .await
            .context("Failed to load Slack users")?;

        let mut handlers = JoinSet::new();
        let result = session
            .listen(|event| {
                // Reap finished handlers so the set only holds in-flight ones
                while handlers.try_join_next().is_some() {}
                let bridge = Arc::clone(&self);
                handlers.spawn(async move {
                    bridge.handle_event(event).await;
                });
            })
            .await;

        if !handlers.is_empty() {
            info!("Waiting for {} in-flight event(s)", handlers.len());
        }
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!("Event handler task failed: {}", e);
            }
        }

        result?;
        Ok(())
    }

    pub async fn build_channel_cache(&self) -> Result<usize> {
        let count = self
            .channels
            .build(self.directory.as_ref(), &self.channel_filter)
            .await?;
        if !self.channel_filter.is_empty() && count < self.channel_filter.len() {
            warn!(
                "Only {} of {} monitored channel(s) were found",
                count,
                self.channel_filter.len()
            );
        }
        Ok(count)
    }

    pub async fn build_user_cache(&self) -> Result<usize> {
        Ok(self.users.build(self.directory.as_ref()).await?)
    }

    /// Handle one RTM event. Returns the notification when one was sent.
    pub async fn handle_event(&self, event: ChatEvent) -> Option<String> {
        let message = match event {
            ChatEvent::Rejected(value) => {
                error!("Error: {}", value);
                return None;
            }
            ChatEvent::Message(message) => message,
            ChatEvent::Other { kind, subtype } => {
                trace!("Ignoring event {:?} (subtype {:?})", kind, subtype);
                return None;
            }
        };

        if !self.passes_filter(&message).await {
            debug!("Message in {} filtered out", message.channel);
            return None;
        }

        let notification = self.pretty_string(&message).await;
        let delivered = self.send_all(&notification).await;
        info!(
            "Forwarded message from {} to {}/{} contact(s)",
            message.channel,
            delivered,
            self.options.contacts.len()
        );
        Some(notification)
    }

    async fn passes_filter(&self, message: &NewMessage) -> bool {
        let channel_ok =
            self.channel_filter.is_empty() || self.channels.contains(&message.channel).await;
        channel_ok && self.matches_keywords(&message.text)
    }

    pub fn matches_keywords(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let text = if self.options.ignore_case_keywords {
            Cow::Owned(text.to_lowercase())
        } else {
            Cow::Borrowed(text)
        };
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    async fn pretty_string(&self, message: &NewMessage) -> String {
        let username = match self
            .users
            .get_or_fetch(&message.user, self.directory.as_ref())
            .await
        {
            Ok(profile) => profile.display_name,
            Err(e) => {
                error!("Error: failed to look up user {}: {}", message.user, e);
                message.user.clone()
            }
        };

        let channel_name = self
            .channels
            .get(&message.channel)
            .await
            .unwrap_or_else(|| message.channel.clone());

        format_notification(
            &channel_name,
            &self.options.team_name,
            &username,
            &message.text,
        )
    }

    /// Text `body` to every contact. Returns how many sends succeeded.
    pub async fn send_all(&self, body: &str) -> usize {
        let sends = self.options.contacts.iter().map(|contact| async move {
            match self
                .gateway
                .send_message(&contact.phone, &self.from_phone, body)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    error!("Error: failed to text {}: {}", contact.phone, e);
                    false
                }
            }
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    fn print_intro(&self) {
        if self.options.quiet {
            return;
        }
        for line in self.intro_lines() {
            info!("{}", line);
        }
    }

    /// Startup summary of contacts, keywords and channels
    fn intro_lines(&self) -> Vec<String> {
        let mut lines = vec!["Starting slack-texts ...".to_string()];

        let contacts = &self.options.contacts;
        if contacts.is_empty() {
            lines.push("No phone numbers specified.".to_string());
        } else {
            let noun = if contacts.len() == 1 {
                "phone number"
            } else {
                "phone numbers"
            };
            lines.push(format!(
                "New messages will be sent to {} {}:",
                contacts.len(),
                noun
            ));
            lines.extend(contacts.iter().map(|c| format!("  {}", c.phone)));
        }

        if self.options.keywords.is_empty() {
            lines.push("Keyword filtering is disabled.".to_string());
        } else {
            lines.push(format!(
                "Filtering messages by these keywords ({}): {}",
                self.options.keywords.len(),
                self.options.keywords.join(", ")
            ));
        }

        if self.options.ignore_case_keywords {
            lines.push("Keywords are not case-sensitive.".to_string());
        } else {
            lines.push("Keywords are case-sensitive.".to_string());
        }

        if self.options.channels.is_empty() {
            lines.push("Listening for new messages on all channels.".to_string());
        } else {
            lines.push(format!(
                "Listening for new messages on these channels ({}): {}",
                self.options.channels.len(),
                self.options.channels.join(" ")
            ));
        }

        lines
    }
}

/// `#channel (team) @user: text`, without the team part when `team` is empty.
pub fn format_notification(channel: &str, team: &str, username: &str, text: &str) -> String {
    if team.is_empty() {
        format!("#{} @{}: {}", channel, username, text)
    } else {
        format!("#{} ({}) @{}: {}", channel, team, username, text)
    }
}
