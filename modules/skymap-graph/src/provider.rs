// Trait abstraction over the graph data provider. The engine only ever
// sees `GraphSource`; the concrete Bluesky client lives behind it, and
// tests substitute deterministic mocks with no network.

use async_trait::async_trait;

use bluesky_client::{BlueskyClient, BlueskyError, ProfileView, MAX_PAGE_SIZE};
use skymap_common::{Account, Result, SkymapError};

/// One page of connection accounts plus the opaque continuation cursor.
/// Callers page until the cursor is absent.
#[derive(Debug, Clone)]
pub struct ConnectionPage {
    pub accounts: Vec<Account>,
    pub cursor: Option<String>,
}

#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Fetch the subject profile for a handle or subject id.
    async fn profile(&self, actor: &str) -> Result<Account>;

    /// Fetch one page of the actor's followers.
    async fn followers_page(&self, actor: &str, cursor: Option<&str>) -> Result<ConnectionPage>;

    /// Fetch one page of the accounts the actor follows.
    async fn follows_page(&self, actor: &str, cursor: Option<&str>) -> Result<ConnectionPage>;
}

#[async_trait]
impl GraphSource for BlueskyClient {
    async fn profile(&self, actor: &str) -> Result<Account> {
        let profile = self.get_profile(actor).await.map_err(map_provider_error)?;
        Ok(account_from_profile(profile))
    }

    async fn followers_page(&self, actor: &str, cursor: Option<&str>) -> Result<ConnectionPage> {
        let page = self
            .get_followers(actor, MAX_PAGE_SIZE, cursor)
            .await
            .map_err(map_provider_error)?;
        Ok(ConnectionPage {
            accounts: page.followers.into_iter().map(account_from_profile).collect(),
            cursor: page.cursor,
        })
    }

    async fn follows_page(&self, actor: &str, cursor: Option<&str>) -> Result<ConnectionPage> {
        let page = self
            .get_follows(actor, MAX_PAGE_SIZE, cursor)
            .await
            .map_err(map_provider_error)?;
        Ok(ConnectionPage {
            accounts: page.follows.into_iter().map(account_from_profile).collect(),
            cursor: page.cursor,
        })
    }
}

fn account_from_profile(profile: ProfileView) -> Account {
    let display_name = profile
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| profile.handle.clone());
    Account {
        id: profile.did,
        handle: profile.handle,
        display_name,
        followers_count: profile.followers_count,
        following_count: profile.follows_count,
        posts_count: profile.posts_count,
    }
}

fn map_provider_error(err: BlueskyError) -> SkymapError {
    match err {
        BlueskyError::RateLimited { retry_after } => SkymapError::RateLimitExceeded { retry_after },
        BlueskyError::Auth { status, message } => {
            SkymapError::Authentication(format!("status {status}: {message}"))
        }
        BlueskyError::Network(msg) => SkymapError::Transport(msg),
        BlueskyError::Api { status, message } => {
            SkymapError::Transport(format!("provider error (status {status}): {message}"))
        }
        BlueskyError::Parse(msg) => SkymapError::Transport(format!("malformed response: {msg}")),
    }
}
