//! Telegram provider module.
//!
//! Provides the provider traits the scheduler and login flow depend on,
//! the typed error taxonomy, and the grammers-backed implementation.

mod client;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod provider;

pub use client::GrammersProvider;
pub use error::TelegramError;
pub use provider::{
    ChannelHandle, InviteCheck, LoginAttempt, MessagingProvider, ProviderSession, SessionToken,
    VerifiedLogin,
};

/// Masks a phone number for logging (shows last 4 digits).
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}
