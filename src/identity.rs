use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use crate::slack::web_api::{ApiError, WebApiClient};
use crate::slack::{Channel, Member};

/// The Slack lookups the identity caches are filled from
#[async_trait]
pub trait SlackDirectory: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError>;
    async fn list_users(&self) -> Result<Vec<Member>, ApiError>;
    async fn user_info(&self, user_id: &str) -> Result<Member, ApiError>;
}

#[async_trait]
impl SlackDirectory for WebApiClient {
    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError> {
        self.channels_list().await
    }

    async fn list_users(&self) -> Result<Vec<Member>, ApiError> {
        self.users_list().await
    }

    async fn user_info(&self, user_id: &str) -> Result<Member, ApiError> {
        self.users_info(user_id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// The Slack username, shown as `@name` in notifications
    pub display_name: String,
    pub real_name: String,
}

impl From<&Member> for UserProfile {
    fn from(member: &Member) -> Self {
        Self {
            display_name: member.name.clone(),
            real_name: member.real_name(),
        }
    }
}

/// Channel id -> channel name
#[derive(Default)]
pub struct ChannelCache {
    names: RwLock<HashMap<String, String>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert(&self, id: &str, name: &str) {
        self.names
            .write()
            .await
            .insert(id.to_string(), name.to_string());
    }

    pub async fn get(&self, id: &str) -> Option<String> {
        self.names.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.names.read().await.contains_key(id)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.names.read().await.len()
    }

    /// Load the first page of `channels.list`, keeping only channels named in
    /// `filter`. An empty filter keeps every channel.
    pub async fn build(
        &self,
        directory: &dyn SlackDirectory,
        filter: &HashSet<String>,
    ) -> Result<usize, ApiError> {
        let channels = directory.list_channels().await?;
        let mut names = self.names.write().await;
        for channel in channels {
            if filter.is_empty() || filter.contains(&channel.name) {
                debug!("Caching channel #{} ({})", channel.name, channel.id);
                names.insert(channel.id, channel.name);
            }
        }
        info!("Channel cache holds {} channel(s)", names.len());
        Ok(names.len())
    }
}

/// User id -> profile, filled on miss.
///
/// Each id maps to its own cell, so concurrent misses for one id share a single
/// `users.info` call while misses for different ids proceed independently.
#[derive(Default)]
pub struct UserCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<UserProfile>>>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert(&self, id: &str, profile: UserProfile) {
        self.entries
            .lock()
            .await
            .insert(id.to_string(), Arc::new(OnceCell::new_with(Some(profile))));
    }

    #[cfg(test)]
    pub async fn get(&self, id: &str) -> Option<UserProfile> {
        self.entries
            .lock()
            .await
            .get(id)
            .and_then(|cell| cell.get().cloned())
    }

    #[cfg(test)]
    pub async fn contains(&self, id: &str) -> bool {
        self.get(id).await.is_some()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Load every member from `users.list`.
    pub async fn build(&self, directory: &dyn SlackDirectory) -> Result<usize, ApiError> {
        let members = directory.list_users().await?;
        let mut entries = self.entries.lock().await;
        for member in &members {
            entries.insert(
                member.id.clone(),
                Arc::new(OnceCell::new_with(Some(UserProfile::from(member)))),
            );
        }
        let count = entries.values().filter(|cell| cell.initialized()).count();
        info!("User cache holds {} user(s)", count);
        Ok(count)
    }

    /// Return the cached profile, or look it up with `users.info` and cache it.
    /// A failed lookup drops the id's entry so the next event retries.
    pub async fn get_or_fetch(
        &self,
        id: &str,
        directory: &dyn SlackDirectory,
    ) -> Result<UserProfile, ApiError> {
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(id.to_string()).or_default())
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!("User {} not cached, looking up", id);
                let member = directory.user_info(id).await?;
                let profile = UserProfile::from(&member);
                debug!("Cached user {} @{} ({})", id, profile.display_name, profile.real_name);
                Ok::<_, ApiError>(profile)
            })
            .await
            .cloned();

        if result.is_err() {
            let mut entries = self.entries.lock().await;
            let stale = entries
                .get(id)
                .is_some_and(|entry| Arc::ptr_eq(entry, &cell) && !entry.initialized());
            if stale {
                entries.remove(id);
            }
        }

        result
    }
}
