//! Classification of user-supplied channel references.

use std::fmt;

use super::ResolveError;

/// Shortest bare token accepted as a username.
const MIN_BARE_USERNAME_LEN: usize = 5;

const LINK_PREFIXES: [&str; 5] = [
    "https://t.me/",
    "http://t.me/",
    "https://telegram.me/",
    "http://telegram.me/",
    "t.me/",
];

/// A channel reference after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    /// Provider-native channel id.
    Id(i64),
    /// Public username, without the leading `@`.
    Username(String),
    /// Private invite link and the hash extracted from it.
    Invite { link: String, hash: String },
}

impl ChannelRef {
    /// Classifies a raw reference.
    ///
    /// Rules are tried in order: numeric id, `@name` or bare token,
    /// invite link, `t.me` link.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let text = raw.trim();
        let invalid = || ResolveError::InvalidIdentifier(raw.to_owned());

        if text.is_empty() {
            return Err(invalid());
        }

        if is_numeric(text) {
            return parse_channel_id(text).map(Self::Id).ok_or_else(invalid);
        }

        if let Some(name) = text.strip_prefix('@') {
            return if is_username(name) {
                Ok(Self::Username(name.to_owned()))
            } else {
                Err(invalid())
            };
        }

        if is_username(text) && text.len() >= MIN_BARE_USERNAME_LEN {
            return Ok(Self::Username(text.to_owned()));
        }

        if text.contains("joinchat") || text.contains('+') {
            let hash = text
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .replace('+', "");
            return if hash.is_empty() || hash == "joinchat" {
                Err(invalid())
            } else {
                Ok(Self::Invite {
                    link: text.to_owned(),
                    hash,
                })
            };
        }

        if let Some(rest) = LINK_PREFIXES.iter().find_map(|p| text.strip_prefix(p)) {
            let name = rest
                .trim_start_matches('@')
                .split(['/', '?'])
                .next()
                .unwrap_or_default();
            return if is_username(name) {
                Ok(Self::Username(name.to_owned()))
            } else {
                Err(invalid())
            };
        }

        Err(invalid())
    }

    /// Short name of the resolution strategy, for logs.
    #[must_use]
    pub const fn strategy(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::Username(_) => "username",
            Self::Invite { .. } => "invite",
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id}"),
            Self::Username(name) => write!(f, "@{name}"),
            Self::Invite { hash, .. } => write!(f, "invite {hash}"),
        }
    }
}

fn is_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Parses a numeric reference, normalizing Bot API `-100…` ids.
fn parse_channel_id(text: &str) -> Option<i64> {
    let id = match text.strip_prefix("-100") {
        Some(rest) if !rest.is_empty() => rest.parse().ok()?,
        _ => text.parse::<i64>().ok()?.checked_abs()?,
    };
    (id > 0).then_some(id)
}

fn is_username(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
