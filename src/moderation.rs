//! Access gate: the single authority on whether a user may write.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::database::{Storage, UserKey};
use crate::error::{Result, ServerError, Traced};
use crate::user::{Ban, DEFAULT_BAN_REASON, User};

/// Whether `user` is currently barred from write actions.
///
/// Must be evaluated at the moment of the action, a ban may lapse between
/// two requests.
pub fn is_restricted(user: &User) -> bool {
    is_restricted_at(user, Utc::now())
}

/// [`is_restricted`] against an explicit clock.
pub fn is_restricted_at(user: &User, now: DateTime<Utc>) -> bool {
    match &user.ban {
        Some(Ban { until: None, .. }) => true,
        Some(Ban { until: Some(until), .. }) => *until > now,
        None => false,
    }
}

/// Reject the action when `user` is restricted.
pub fn ensure_unrestricted(user: &User) -> Result<()> {
    match &user.ban {
        Some(ban) if is_restricted(user) => Err(ServerError::Restricted {
            reason: ban.reason.clone(),
            until: ban.until,
        }),
        _ => Ok(()),
    }
}

/// Place `user` in timeout. A past `until` is accepted and simply means the
/// ban is already expired.
pub fn apply_ban(
    mut user: User,
    reason: Option<String>,
    until: Option<DateTime<Utc>>,
) -> User {
    let reason = reason
        .map(|r| r.trim().to_owned())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_BAN_REASON.to_owned());

    user.ban = Some(Ban { reason, until });
    user
}

/// Clear any moderation decree.
pub fn lift_ban(mut user: User) -> User {
    user.ban = None;
    user
}

/// Applies moderation decisions to stored users.
#[derive(Clone)]
pub struct Moderator {
    store: Arc<dyn Storage>,
}

impl Moderator {
    /// Create a new [`Moderator`].
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    async fn find(&self, key: UserKey<'_>) -> Result<User> {
        self.store
            .find_user(key)
            .await
            .traced()?
            .ok_or(ServerError::NotFound)
    }

    /// Ban or time out the targeted user.
    #[tracing::instrument(skip(self, reason))]
    pub async fn ban(
        &self,
        key: UserKey<'_>,
        reason: Option<String>,
        until: Option<DateTime<Utc>>,
    ) -> Result<User> {
        let user = apply_ban(self.find(key).await?, reason, until);
        self.store.save_user(&user).await.traced()?;

        metrics::counter!("moderation_actions_total", "action" => "ban")
            .increment(1);
        tracing::info!(user_id = user.id, ?until, "user placed in timeout");

        Ok(user)
    }

    /// Release the targeted user from timeout.
    #[tracing::instrument(skip(self))]
    pub async fn unban(&self, key: UserKey<'_>) -> Result<User> {
        let user = lift_ban(self.find(key).await?);
        self.store.save_user(&user).await.traced()?;

        metrics::counter!("moderation_actions_total", "action" => "unban")
            .increment(1);
        tracing::info!(user_id = user.id, "user released from timeout");

        Ok(user)
    }
}
