//! Action executor implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{AccountAction, ActionError, ActionOutcome};
use crate::accounts::Account;
use crate::resolver::{self, ChannelRef, ResolveError};
use crate::telegram::{MessagingProvider, ProviderSession, TelegramError, mask_phone};

/// Runs one action for one account, end to end.
///
/// Every call opens its own provider session, resolves the channel inside
/// it, performs the action under a timeout and releases the session on
/// every path.
#[derive(Clone)]
pub struct ActionExecutor {
    provider: Arc<dyn MessagingProvider>,
    step_timeout: Duration,
}

impl ActionExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn MessagingProvider>, step_timeout: Duration) -> Self {
        Self {
            provider,
            step_timeout,
        }
    }

    /// Executes `action` against `link` on behalf of `account`.
    pub async fn execute(
        &self,
        account: &Account,
        link: &str,
        action: AccountAction,
    ) -> Result<ActionOutcome, ActionError> {
        let phone = mask_phone(&account.phone_number);
        debug!("[{}] Starting {} on {}", phone, action, link);

        let session = self
            .bounded("connect", self.provider.connect(&account.session_token))
            .await?
            .map_err(ActionError::Connect)?;

        let result = self
            .bounded(action.name(), perform(session.as_ref(), link, action))
            .await
            .and_then(|r| r);

        match tokio::time::timeout(self.step_timeout, session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[{}] Disconnect failed: {}", phone, e),
            Err(_) => warn!("[{}] Disconnect timed out", phone),
        }

        match &result {
            Ok(ActionOutcome::Done(detail)) => info!("[{}] {}: {}", phone, action, detail),
            Ok(ActionOutcome::Skipped(detail)) => {
                info!("[{}] {} skipped: {}", phone, action, detail);
            }
            Err(e) => warn!("[{}] {} failed: {}", phone, action, e),
        }
        result
    }

    async fn bounded<T>(
        &self,
        step: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, ActionError> {
        tokio::time::timeout(self.step_timeout, fut)
            .await
            .map_err(|_| ActionError::Timeout {
                step,
                after: self.step_timeout,
            })
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("step_timeout", &self.step_timeout)
            .finish_non_exhaustive()
    }
}

async fn perform(
    session: &dyn ProviderSession,
    link: &str,
    action: AccountAction,
) -> Result<ActionOutcome, ActionError> {
    match action {
        AccountAction::Join => join(session, link).await,
        AccountAction::Leave => {
            let channel = match resolver::resolve(session, link).await {
                Ok(channel) => channel,
                Err(ResolveError::NotAParticipant(_)) => {
                    return Ok(ActionOutcome::Skipped("not a participant".to_owned()));
                }
                Err(e) => return Err(e.into()),
            };
            settle(
                session.leave_channel(&channel).await,
                format!("left {}", channel.title),
            )
        }
        AccountAction::Mute | AccountAction::Unmute => {
            let channel = resolver::resolve(session, link).await?;
            let muted = action == AccountAction::Mute;
            settle(
                session.set_muted(&channel, muted).await,
                format!("{} {}", if muted { "muted" } else { "unmuted" }, channel.title),
            )
        }
        AccountAction::View => {
            let channel = resolver::resolve(session, link).await?;
            match session.view_latest_post(&channel).await? {
                Some(post_id) => Ok(ActionOutcome::Done(format!(
                    "viewed post {post_id} in {}",
                    channel.title
                ))),
                None => Ok(ActionOutcome::Skipped(format!("{} has no posts", channel.title))),
            }
        }
        AccountAction::JoinLive => {
            let channel = resolver::resolve(session, link).await?;
            settle(
                session.join_live(&channel).await,
                format!("joined live session in {}", channel.title),
            )
        }
        AccountAction::RaiseHand => {
            let channel = resolver::resolve(session, link).await?;
            settle(
                session.raise_hand(&channel).await,
                format!("raised hand in {}", channel.title),
            )
        }
        AccountAction::LeaveLive => {
            let channel = resolver::resolve(session, link).await?;
            settle(
                session.leave_live(&channel).await,
                format!("left live session in {}", channel.title),
            )
        }
    }
}

async fn join(session: &dyn ProviderSession, link: &str) -> Result<ActionOutcome, ActionError> {
    let channel_ref = ChannelRef::parse(link)?;

    let (channel, outcome) = match &channel_ref {
        ChannelRef::Invite { hash, .. } => match session.import_invite(hash).await {
            Ok(channel) => {
                let detail = format!("joined {}", channel.title);
                (channel, ActionOutcome::Done(detail))
            }
            Err(TelegramError::AlreadyParticipant) => {
                let channel = resolver::resolve_ref(session, &channel_ref, link).await?;
                let detail = format!("already in {}", channel.title);
                (channel, ActionOutcome::Skipped(detail))
            }
            Err(e) => return Err(e.into()),
        },
        _ => {
            let channel = resolver::resolve_ref(session, &channel_ref, link).await?;
            let outcome = settle(
                session.join_channel(&channel).await,
                format!("joined {}", channel.title),
            )?;
            (channel, outcome)
        }
    };

    // Reading the history makes the channel show up in the chat list.
    if let Err(e) = session.mark_read(&channel).await {
        warn!("Read history skipped for {}: {}", channel.title, e);
    }

    Ok(outcome)
}

/// Turns "already there" provider errors into a skipped outcome.
fn settle(result: Result<(), TelegramError>, done: String) -> Result<ActionOutcome, ActionError> {
    match result {
        Ok(()) => Ok(ActionOutcome::Done(done)),
        Err(e) if e.is_already_in_state() => Ok(ActionOutcome::Skipped(e.to_string())),
        Err(e) => Err(e.into()),
    }
}
