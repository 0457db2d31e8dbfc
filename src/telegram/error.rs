//! Typed errors for Telegram operations.

use grammers_client::InvocationError;
use thiserror::Error;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelegramError {
    #[error("Not authorized. The stored session is no longer valid.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired,

    #[error("Invalid login code")]
    InvalidCode,

    #[error("Login code expired")]
    CodeExpired,

    #[error("Invalid 2FA password")]
    InvalidPassword,

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Already a participant of this chat")]
    AlreadyParticipant,

    #[error("Not a participant of this chat")]
    NotParticipant,

    #[error("Chat not found: {0}")]
    NotFound(String),

    #[error("No live session is running in this chat")]
    NoActiveCall,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl TelegramError {
    /// Classifies a raw provider error message.
    ///
    /// Used where the provider only hands back a displayable error, and as
    /// the fallback for RPC errors without a structured match.
    #[must_use]
    pub fn from_message(err_str: &str) -> Self {
        if let Some(seconds) = extract_flood_wait_seconds(err_str) {
            return Self::FloodWait(seconds);
        }

        classify_rpc_name(err_str).unwrap_or_else(|| Self::Invocation(err_str.to_owned()))
    }

    /// Returns true for errors meaning the account is already where the
    /// action wanted it to be.
    #[must_use]
    pub const fn is_already_in_state(&self) -> bool {
        matches!(self, Self::AlreadyParticipant | Self::NotParticipant)
    }
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        if let InvocationError::Rpc(rpc) = &err {
            if (rpc.name.starts_with("FLOOD_WAIT") || rpc.name.starts_with("FLOOD_PREMIUM_WAIT"))
                && let Some(seconds) = rpc.value
            {
                return Self::FloodWait(seconds);
            }
            if let Some(kind) = classify_rpc_name(&rpc.name) {
                return kind;
            }
        }

        Self::from_message(&err.to_string())
    }
}

/// Maps well-known RPC error names onto typed variants.
fn classify_rpc_name(text: &str) -> Option<TelegramError> {
    const KNOWN: [(&str, TelegramError); 7] = [
        ("USER_ALREADY_PARTICIPANT", TelegramError::AlreadyParticipant),
        ("USER_NOT_PARTICIPANT", TelegramError::NotParticipant),
        ("PHONE_CODE_INVALID", TelegramError::InvalidCode),
        ("PHONE_CODE_EXPIRED", TelegramError::CodeExpired),
        ("PASSWORD_HASH_INVALID", TelegramError::InvalidPassword),
        ("SESSION_PASSWORD_NEEDED", TelegramError::PasswordRequired),
        ("AUTH_KEY_UNREGISTERED", TelegramError::NotAuthorized),
    ];

    KNOWN
        .into_iter()
        .find(|(name, _)| text.contains(name))
        .map(|(_, kind)| kind)
}

/// Extracts flood wait seconds from an error message.
///
/// grammers strips the `_N` suffix off RPC names and prints the number as
/// `(value: N)`, so both spellings are recognized.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let lowered = err_msg.to_lowercase();
    let leading_number = |from: usize| -> Option<u32> {
        lowered[from..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok()
    };

    for pattern in ["flood_wait_", "flood_premium_wait_", "flood wait ", "a wait of "] {
        if let Some(idx) = lowered.find(pattern)
            && let Some(seconds) = leading_number(idx + pattern.len())
        {
            return Some(seconds);
        }
    }

    if lowered.contains("flood_wait") || lowered.contains("flood_premium_wait") {
        let value = "(value: ";
        return lowered
            .find(value)
            .and_then(|idx| leading_number(idx + value.len()));
    }
    None
}
