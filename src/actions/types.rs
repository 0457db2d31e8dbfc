//! Action types and definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::ResolveError;
use crate::telegram::TelegramError;

/// Things an account can be told to do with a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountAction {
    /// Join the channel (importing the invite for private links).
    Join,

    /// Leave the channel.
    Leave,

    /// Mute channel notifications.
    Mute,

    /// Unmute channel notifications.
    Unmute,

    /// Count a view on the newest post.
    View,

    /// Join the channel's live session.
    JoinLive,

    /// Join the live session and raise a hand.
    RaiseHand,

    /// Leave the live session.
    LeaveLive,
}

impl AccountAction {
    /// Parses an action name as sent by the front end.
    ///
    /// Returns `None` for unknown names.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "join" => Some(Self::Join),
            "leave" => Some(Self::Leave),
            "mute" => Some(Self::Mute),
            "unmute" => Some(Self::Unmute),
            "view" => Some(Self::View),
            "join_live" => Some(Self::JoinLive),
            "raise_hand" => Some(Self::RaiseHand),
            "leave_live" => Some(Self::LeaveLive),
            _ => None,
        }
    }

    /// Returns the action name as it appears in logs and job records.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::View => "view",
            Self::JoinLive => "join_live",
            Self::RaiseHand => "raise_hand",
            Self::LeaveLive => "leave_live",
        }
    }

    /// The action scheduled after a delay to undo this one, if any.
    #[must_use]
    pub const fn reciprocal(&self) -> Option<Self> {
        match self {
            Self::Join => Some(Self::Leave),
            Self::Mute => Some(Self::Unmute),
            _ => None,
        }
    }
}

impl fmt::Display for AccountAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one account action that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action ran.
    Done(String),

    /// The account was already where the action would have put it.
    Skipped(String),
}

impl ActionOutcome {
    /// Human-readable detail for logs and job records.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Done(detail) | Self::Skipped(detail) => detail,
        }
    }
}

/// Failures of a single account action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("Could not open session: {0}")]
    Connect(TelegramError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Provider(#[from] TelegramError),

    #[error("{step} timed out after {}s", after.as_secs())]
    Timeout { step: &'static str, after: Duration },
}
