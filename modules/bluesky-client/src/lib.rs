pub mod error;
pub mod types;

pub use error::{BlueskyError, Result};
pub use types::{FollowersPage, FollowsPage, ProfileView};

use std::time::Duration;

use serde::de::DeserializeOwned;

/// Largest page size the AppView accepts for graph listings.
pub const MAX_PAGE_SIZE: u32 = 100;

const DEFAULT_BASE_URL: &str = "https://public.api.bsky.app";

pub struct BlueskyClient {
    client: reqwest::Client,
    base_url: String,
}

impl BlueskyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
        }
    }

    pub fn public() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }

    /// Fetch a single profile by handle or DID.
    pub async fn get_profile(&self, actor: &str) -> Result<ProfileView> {
        tracing::debug!(actor, "Fetching profile");
        self.get("app.bsky.actor.getProfile", &[("actor", actor)])
            .await
    }

    /// Fetch one page of an actor's followers.
    pub async fn get_followers(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<FollowersPage> {
        tracing::debug!(actor, limit, cursor = cursor.unwrap_or(""), "Fetching followers page");
        let limit = limit.to_string();
        let mut params = vec![("actor", actor), ("limit", limit.as_str())];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.get("app.bsky.graph.getFollowers", &params).await
    }

    /// Fetch one page of the accounts an actor follows.
    pub async fn get_follows(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<FollowsPage> {
        tracing::debug!(actor, limit, cursor = cursor.unwrap_or(""), "Fetching follows page");
        let limit = limit.to_string();
        let mut params = vec![("actor", actor), ("limit", limit.as_str())];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.get("app.bsky.graph.getFollows", &params).await
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/xrpc/{}", self.base_url, method);
        let resp = self.client.get(&url).query(params).send().await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(resp.headers());
            return Err(BlueskyError::RateLimited { retry_after });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = resp.text().await.unwrap_or_default();
            return Err(BlueskyError::Auth {
                status: status.as_u16(),
                message: body,
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BlueskyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

/// Read the provider's wait hint from a throttled response. The AppView
/// sends a standard `retry-after` in seconds.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
