//! The messaging provider seam.
//!
//! Everything the rest of the crate needs from Telegram goes through these
//! traits. The grammers-backed implementation lives in `client.rs`; tests
//! plug in a recording double.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TelegramError;

/// Opaque, provider-issued credential for one account.
///
/// Only the provider knows how to turn this into a live session.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Provider-native reference to a channel, valid for the session that
/// resolved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: i64,
    pub access_hash: i64,
    pub title: String,
}

/// Outcome of checking an invite hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteCheck {
    /// The caller already belongs to the chat behind the invite.
    Member(ChannelHandle),
    /// The invite is valid but the caller has not joined.
    NotMember { title: String },
}

/// Result of a completed login.
#[derive(Debug, Clone)]
pub struct VerifiedLogin {
    pub token: SessionToken,
    pub username: Option<String>,
}

/// Factory for provider sessions.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Opens a live session bound to a stored credential.
    async fn connect(&self, token: &SessionToken) -> Result<Box<dyn ProviderSession>, TelegramError>;

    /// Starts a login by asking Telegram to send a one-time code.
    async fn request_code(&self, phone: &str) -> Result<Box<dyn LoginAttempt>, TelegramError>;

    /// Destroys a stored credential so it can never connect again.
    async fn forget(&self, token: &SessionToken) -> Result<(), TelegramError>;
}

/// A login waiting for its one-time code.
#[async_trait]
pub trait LoginAttempt: Send + Sync {
    /// Finishes the login. The transient session is torn down on every outcome.
    async fn verify(
        self: Box<Self>,
        code: &str,
        password: Option<&str>,
    ) -> Result<VerifiedLogin, TelegramError>;

    /// Drops the attempt and releases its session.
    async fn abort(self: Box<Self>);
}

/// One connected account.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn resolve_username(&self, username: &str) -> Result<ChannelHandle, TelegramError>;

    async fn resolve_channel_id(&self, id: i64) -> Result<ChannelHandle, TelegramError>;

    /// Resolves an invite link without touching the invite itself.
    ///
    /// Only succeeds when the session can already map the link to a chat.
    async fn resolve_invite_link(&self, link: &str) -> Result<ChannelHandle, TelegramError>;

    async fn check_invite(&self, hash: &str) -> Result<InviteCheck, TelegramError>;

    async fn import_invite(&self, hash: &str) -> Result<ChannelHandle, TelegramError>;

    async fn join_channel(&self, channel: &ChannelHandle) -> Result<(), TelegramError>;

    async fn leave_channel(&self, channel: &ChannelHandle) -> Result<(), TelegramError>;

    /// Reads the channel history so it shows up in the account's chat list.
    async fn mark_read(&self, channel: &ChannelHandle) -> Result<(), TelegramError>;

    async fn set_muted(&self, channel: &ChannelHandle, muted: bool) -> Result<(), TelegramError>;

    /// Counts a view on the newest post. Returns the post id, if any.
    async fn view_latest_post(&self, channel: &ChannelHandle) -> Result<Option<i32>, TelegramError>;

    async fn join_live(&self, channel: &ChannelHandle) -> Result<(), TelegramError>;

    async fn raise_hand(&self, channel: &ChannelHandle) -> Result<(), TelegramError>;

    async fn leave_live(&self, channel: &ChannelHandle) -> Result<(), TelegramError>;

    /// Releases the session.
    async fn disconnect(self: Box<Self>) -> Result<(), TelegramError>;
}
