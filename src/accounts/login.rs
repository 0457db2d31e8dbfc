//! Phone-code login flow.
//!
//! `send_code` parks a [`LoginAttempt`] in [`PendingLogins`] keyed by phone
//! number; `verify_code` claims it, finishes the sign-in and stores the
//! account. Pending attempts expire after a TTL and are reaped in the
//! background.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};

use super::store::{Account, AccountStore, StoreError};
use crate::telegram::{LoginAttempt, MessagingProvider, SessionToken, TelegramError, mask_phone};

/// Errors surfaced by the login flow.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Phone number is required.")]
    MissingPhone,

    #[error("Account {0} is already registered.")]
    AlreadyRegistered(String),

    #[error("Rate limited. Please wait {minutes} minutes.")]
    RateLimited { minutes: u64 },

    #[error("No pending login found for this phone number.")]
    NoPendingLogin,

    #[error("Two-factor password required.")]
    PasswordRequired,

    #[error("Invalid login code.")]
    InvalidCode,

    #[error("Login code expired.")]
    CodeExpired,

    #[error("Invalid two-factor password.")]
    InvalidPassword,

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Failed to send code: {0}")]
    SendFailed(TelegramError),

    #[error(transparent)]
    Store(StoreError),
}

impl LoginError {
    fn from_verify(err: TelegramError) -> Self {
        match err {
            TelegramError::PasswordRequired => Self::PasswordRequired,
            TelegramError::InvalidCode => Self::InvalidCode,
            TelegramError::CodeExpired => Self::CodeExpired,
            TelegramError::InvalidPassword => Self::InvalidPassword,
            TelegramError::FloodWait(seconds) => Self::RateLimited {
                minutes: wait_minutes(seconds),
            },
            other => Self::VerificationFailed(other.to_string()),
        }
    }
}

/// Rounds a provider cooldown up to whole minutes.
#[must_use]
pub fn wait_minutes(seconds: u32) -> u64 {
    u64::from(seconds).div_ceil(60)
}

struct PendingLogin {
    attempt: Box<dyn LoginAttempt>,
    created_at: Instant,
}

/// Short-lived logins waiting for their code, keyed by phone number.
pub struct PendingLogins {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingLogin>>,
}

impl PendingLogins {
    /// Creates an empty store whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Parks an attempt. The last write for a phone number wins; the
    /// replaced attempt is returned so the caller can release it.
    pub async fn insert(
        &self,
        phone: &str,
        attempt: Box<dyn LoginAttempt>,
    ) -> Option<Box<dyn LoginAttempt>> {
        let entry = PendingLogin {
            attempt,
            created_at: Instant::now(),
        };
        self.entries
            .lock()
            .await
            .insert(phone.to_owned(), entry)
            .map(|old| old.attempt)
    }

    /// Claims the attempt for `phone` if it has not expired.
    pub async fn take(&self, phone: &str) -> Option<Box<dyn LoginAttempt>> {
        let entry = self.entries.lock().await.remove(phone)?;

        if entry.created_at.elapsed() >= self.ttl {
            debug!("Pending login for {} expired", mask_phone(phone));
            entry.attempt.abort().await;
            return None;
        }
        Some(entry.attempt)
    }

    /// Whether a live entry exists for `phone`.
    pub async fn contains(&self, phone: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(phone)
            .is_some_and(|e| e.created_at.elapsed() < self.ttl)
    }

    /// Number of parked attempts, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is parked.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Removes and aborts every expired attempt. Returns how many were reaped.
    pub async fn reap_expired(&self) -> usize {
        let expired: Vec<(String, PendingLogin)> = {
            let mut entries = self.entries.lock().await;
            let phones: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.created_at.elapsed() >= self.ttl)
                .map(|(phone, _)| phone.clone())
                .collect();
            phones
                .into_iter()
                .filter_map(|phone| entries.remove(&phone).map(|e| (phone, e)))
                .collect()
        };

        let count = expired.len();
        for (phone, entry) in expired {
            debug!("Reaping abandoned login for {}", mask_phone(&phone));
            entry.attempt.abort().await;
        }
        count
    }

    /// Periodically reaps expired attempts until a shutdown message arrives.
    pub async fn run_reaper(&self, every: Duration, mut rx: mpsc::Receiver<()>) {
        info!("Pending login reaper started");

        let mut timer = interval(every);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let reaped = self.reap_expired().await;
                    if reaped > 0 {
                        info!("Reaped {} abandoned logins", reaped);
                    }
                }
                _ = rx.recv() => {
                    info!("Pending login reaper shutting down");
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for PendingLogins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLogins")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Drives send-code / verify-code against the provider and the store.
#[derive(Clone)]
pub struct LoginFlow {
    provider: Arc<dyn MessagingProvider>,
    store: Arc<AccountStore>,
    pending: Arc<PendingLogins>,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        provider: Arc<dyn MessagingProvider>,
        store: Arc<AccountStore>,
        pending: Arc<PendingLogins>,
    ) -> Self {
        Self {
            provider,
            store,
            pending,
        }
    }

    /// Requests a login code for `phone`.
    pub async fn send_code(&self, phone: &str) -> Result<(), LoginError> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(LoginError::MissingPhone);
        }

        if self.store.find_by_phone(phone).await.is_some() {
            return Err(LoginError::AlreadyRegistered(phone.to_owned()));
        }

        let attempt = self.provider.request_code(phone).await.map_err(|e| match e {
            TelegramError::FloodWait(seconds) => {
                warn!("Flood wait on send code: {} seconds", seconds);
                LoginError::RateLimited {
                    minutes: wait_minutes(seconds),
                }
            }
            other => LoginError::SendFailed(other),
        })?;

        if let Some(replaced) = self.pending.insert(phone, attempt).await {
            debug!("Replacing earlier pending login for {}", mask_phone(phone));
            replaced.abort().await;
        }

        info!("Code sent to {}", mask_phone(phone));
        Ok(())
    }

    /// Completes the pending login for `phone` and stores the account.
    pub async fn verify_code(
        &self,
        phone: &str,
        code: &str,
        password: Option<&str>,
    ) -> Result<Account, LoginError> {
        let phone = phone.trim();
        let attempt = self
            .pending
            .take(phone)
            .await
            .ok_or(LoginError::NoPendingLogin)?;

        let login = attempt
            .verify(code.trim(), password)
            .await
            .map_err(LoginError::from_verify)?;

        let token = login.token.clone();
        let account = Account::new(
            phone.to_owned(),
            login.token,
            login.username.unwrap_or_default(),
        );

        match self.store.insert(account).await {
            Ok(account) => Ok(account),
            Err(e) => {
                // The fresh session is authorized but belongs to no account
                self.forget_session(&token).await;
                Err(match e {
                    StoreError::DuplicatePhone(phone) => LoginError::AlreadyRegistered(phone),
                    other => LoginError::Store(other),
                })
            }
        }
    }

    /// Removes an account and destroys its stored session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id, or an I/O error if
    /// the store cannot be saved. The session is kept in both cases.
    pub async fn remove_account(&self, id: &str) -> Result<Account, StoreError> {
        let removed = self.store.remove(id).await?;
        self.forget_session(&removed.session_token).await;
        Ok(removed)
    }

    async fn forget_session(&self, token: &SessionToken) {
        if let Err(e) = self.provider.forget(token).await {
            warn!("Failed to delete session credential: {}", e);
        }
    }

    /// The pending-login store this flow writes to.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingLogins> {
        &self.pending
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
