use serde::Deserialize;

/// A profile as returned by `app.bsky.actor.getProfile` and embedded in
/// follower/follows listings. Only the fields the analysis needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "followersCount", default)]
    pub followers_count: u32,
    #[serde(rename = "followsCount", default)]
    pub follows_count: u32,
    #[serde(rename = "postsCount", default)]
    pub posts_count: u32,
}

/// One page of `app.bsky.graph.getFollowers`. The cursor is opaque;
/// callers page until it is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowersPage {
    pub followers: Vec<ProfileView>,
    pub cursor: Option<String>,
}

/// One page of `app.bsky.graph.getFollows`.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowsPage {
    pub follows: Vec<ProfileView>,
    pub cursor: Option<String>,
}
