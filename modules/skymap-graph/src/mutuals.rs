use std::collections::HashSet;

use tracing::debug;

use skymap_common::{Account, Result};

use crate::collector::ConnectionCollector;

/// Accounts appearing in both the follower and following lists, keyed by
/// subject id (handles may collide or be reassigned). Hash-set
/// intersection, O(n+m); output order follows the following list, with
/// the profile snapshot taken from it.
pub fn resolve_mutuals(followers: &[Account], following: &[Account]) -> Vec<Account> {
    let follower_ids: HashSet<&str> = followers.iter().map(|a| a.id.as_str()).collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mutuals: Vec<Account> = following
        .iter()
        .filter(|a| follower_ids.contains(a.id.as_str()) && seen.insert(a.id.as_str()))
        .cloned()
        .collect();

    debug!(
        followers = followers.len(),
        following = following.len(),
        mutuals = mutuals.len(),
        "Resolved mutual connections"
    );
    mutuals
}

/// Authoritative pairwise check: confirm `a` and `b` follow each other by
/// independently fetching both accounts' follows lists. Used when a
/// single-sided inference is not enough; always refetches.
pub async fn verify_mutual(
    collector: &ConnectionCollector,
    a: &Account,
    b: &Account,
) -> Result<bool> {
    let a_follows = collector.following(&a.handle, true).await?;
    if !a_follows.iter().any(|acct| acct.id == b.id) {
        return Ok(false);
    }
    let b_follows = collector.following(&b.handle, true).await?;
    Ok(b_follows.iter().any(|acct| acct.id == a.id))
}
