//! Channel Crew Library
//!
//! Drives a pool of Telegram user accounts from a small REST backend.
//!
//! This crate provides the core functionality for:
//! - Registering accounts through phone-code login
//! - Resolving channel references (ids, usernames, links, invites)
//! - Running join / leave / mute / view / live-session actions on
//!   staggered schedules
//! - Serving the JSON API consumed by the front end

pub mod accounts;
pub mod actions;
pub mod api;
pub mod config;
pub mod resolver;
pub mod scheduler;
pub mod telegram;
