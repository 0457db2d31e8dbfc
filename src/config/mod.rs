//! Configuration module for the account pool server.
//!
//! Handles loading of Telegram API credentials and server settings
//! from the environment.

mod settings;

pub use settings::{ConfigError, ServerSettings, TelegramConfig};
