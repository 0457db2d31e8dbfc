//! Request and response bodies.
//!
//! The front end posts form values, so numeric fields arrive either as JSON
//! numbers or as numeric strings. Everything is validated here before a
//! handler touches the store or the scheduler.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::ApiError;
use crate::accounts::Account;
use crate::scheduler::JobId;

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_DAY: f64 = 86_400.0;
/// Longest delay a request may ask for: ten years.
const MAX_DELAY_SECS: f64 = 10.0 * 365.0 * SECS_PER_DAY;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(f64),
    Text(String),
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawNumber::Number(n)) => Ok(Some(n)),
        Some(RawNumber::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawNumber::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("'{text}' is not a number"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTime {
    EpochMillis(i64),
    Text(String),
}

fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawTime>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawTime::EpochMillis(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("{ms} is out of range"))),
        Some(RawTime::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawTime::Text(text)) => parse_time(&text)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("'{text}' is not a valid time"))),
    }
}

/// Parses RFC 3339, epoch milliseconds, or a zone-less `datetime-local`
/// value (taken as UTC).
fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }
    if let Ok(ms) = text.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms);
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Returns the trimmed channel link or a validation error.
pub fn channel_link(raw: &str) -> Result<String, ApiError> {
    let link = raw.trim();
    if link.is_empty() {
        return Err(ApiError::validation("channelLink is required."));
    }
    Ok(link.to_owned())
}

/// Validates a non-negative whole number.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn count(value: Option<f64>, field: &str) -> Result<usize, ApiError> {
    let value = value.ok_or_else(|| ApiError::validation(format!("{field} is required.")))?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(ApiError::validation(format!(
            "{field} must be a non-negative whole number."
        )));
    }
    Ok(value as usize)
}

fn duration(value: f64, unit_secs: f64, field: &str) -> Result<Duration, ApiError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ApiError::validation(format!(
            "{field} must be a non-negative number."
        )));
    }
    let secs = value * unit_secs;
    if secs > MAX_DELAY_SECS {
        return Err(ApiError::validation(format!("{field} is too large.")));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ApiError::validation(format!("{field} is too large.")))
}

/// Validates a required amount of seconds.
pub fn seconds(value: Option<f64>, field: &str) -> Result<Duration, ApiError> {
    let value = value.ok_or_else(|| ApiError::validation(format!("{field} is required.")))?;
    duration(value, 1.0, field)
}

/// Validates an amount of minutes; a missing value means zero.
pub fn minutes(value: Option<f64>, field: &str) -> Result<Duration, ApiError> {
    duration(value.unwrap_or(0.0), SECS_PER_MINUTE, field)
}

/// Validates an amount of days; a missing value means zero.
pub fn days(value: Option<f64>, field: &str) -> Result<Duration, ApiError> {
    duration(value.unwrap_or(0.0), SECS_PER_DAY, field)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCodeRequest {
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub channel_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChannelRequest {
    #[serde(default)]
    pub channel_link: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub number_of_accounts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub join_delay_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub stay_days: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveChannelRequest {
    #[serde(default)]
    pub channel_link: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub interval_minutes: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteUnmuteRequest {
    #[serde(default)]
    pub channel_link: String,
    #[serde(default)]
    pub action: String,
    /// Minutes until the automatic unmute; zero disables it.
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub interval_minutes: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddViewsRequest {
    #[serde(default)]
    pub channel_link: String,
    /// Seconds between two accounts.
    #[serde(default, deserialize_with = "lenient_number")]
    pub time_delay: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub run_minutes: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSessionRequest {
    #[serde(default)]
    pub channel_link: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub account_count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub join_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub leave_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub raise_hand_count: Option<f64>,
    /// Minutes between consecutive raised hands.
    #[serde(default, deserialize_with = "lenient_number")]
    pub raise_hand_delay: Option<f64>,
}

/// Plain acknowledgement.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Acknowledgement of a scheduling request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledResponse {
    pub success: bool,
    pub message: String,
    pub job_ids: Vec<JobId>,
}

impl ScheduledResponse {
    pub fn new(message: impl Into<String>, job_ids: Vec<JobId>) -> Self {
        Self {
            success: true,
            message: message.into(),
            job_ids,
        }
    }
}

/// Account as exposed over HTTP; the session token never leaves the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub phone_number: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            phone_number: account.phone_number,
            username: account.username,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    pub success: bool,
    pub message: String,
    pub account: AccountView,
}
