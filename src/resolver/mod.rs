//! Channel identifier resolver.
//!
//! Turns whatever the user typed (numeric id, `@username`, bare username,
//! `t.me/...` link, or a private invite link) into a [`ChannelHandle`] for
//! a specific provider session.

mod identifier;

use thiserror::Error;
use tracing::debug;

pub use identifier::ChannelRef;

use crate::telegram::{ChannelHandle, InviteCheck, ProviderSession, TelegramError};

/// Errors produced while classifying or resolving a channel reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Invalid channel identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Account is not a participant of '{0}'")]
    NotAParticipant(String),

    #[error("Could not resolve channel: '{0}'")]
    Unresolvable(String),

    #[error(transparent)]
    Provider(TelegramError),
}

impl ResolveError {
    fn from_provider(raw: &str, err: TelegramError) -> Self {
        match err {
            TelegramError::NotFound(_) => Self::Unresolvable(raw.to_owned()),
            TelegramError::NotParticipant => Self::NotAParticipant(raw.to_owned()),
            other => Self::Provider(other),
        }
    }
}

/// Resolves a raw channel reference within `session`.
pub async fn resolve(
    session: &dyn ProviderSession,
    raw: &str,
) -> Result<ChannelHandle, ResolveError> {
    let channel_ref = ChannelRef::parse(raw)?;
    resolve_ref(session, &channel_ref, raw).await
}

/// Resolves an already classified reference.
pub async fn resolve_ref(
    session: &dyn ProviderSession,
    channel_ref: &ChannelRef,
    raw: &str,
) -> Result<ChannelHandle, ResolveError> {
    debug!("Resolving {} via {} strategy", channel_ref, channel_ref.strategy());

    match channel_ref {
        ChannelRef::Id(id) => session
            .resolve_channel_id(*id)
            .await
            .map_err(|e| ResolveError::from_provider(raw, e)),
        ChannelRef::Username(name) => session
            .resolve_username(name)
            .await
            .map_err(|e| ResolveError::from_provider(raw, e)),
        ChannelRef::Invite { link, hash } => resolve_invite(session, link, hash, raw).await,
    }
}

async fn resolve_invite(
    session: &dyn ProviderSession,
    link: &str,
    hash: &str,
    raw: &str,
) -> Result<ChannelHandle, ResolveError> {
    match session.resolve_invite_link(link).await {
        Ok(handle) => return Ok(handle),
        Err(e) => debug!("Direct resolution of invite failed ({}), checking invite", e),
    }

    match session
        .check_invite(hash)
        .await
        .map_err(|e| ResolveError::from_provider(raw, e))?
    {
        InviteCheck::Member(handle) => Ok(handle),
        InviteCheck::NotMember { title } => {
            debug!("Invite check says caller is not in '{}'", title);
            Err(ResolveError::NotAParticipant(raw.to_owned()))
        }
    }
}
