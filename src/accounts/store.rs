//! JSON-file backed account store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::telegram::{SessionToken, mask_phone};

/// Errors that can occur while reading or writing accounts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An account for {0} already exists")]
    DuplicatePhone(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Failed to access account file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse account file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Phone number the account was registered with.
    pub phone_number: String,

    /// Opaque credential used to reconnect.
    pub session_token: SessionToken,

    /// Telegram username, empty when the account has none.
    #[serde(default)]
    pub username: String,

    /// When the account was registered.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new account record with a fresh id.
    #[must_use]
    pub fn new(phone_number: String, session_token: SessionToken, username: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phone_number,
            session_token,
            username,
            created_at: Utc::now(),
        }
    }
}

/// Account collection, kept in memory and mirrored to a JSON file.
#[derive(Debug)]
pub struct AccountStore {
    /// File the collection is mirrored to; `None` keeps it in memory only.
    path: Option<PathBuf>,

    /// Accounts in insertion order.
    accounts: RwLock<Vec<Account>>,
}

impl AccountStore {
    /// Creates a store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            accounts: RwLock::new(Vec::new()),
        }
    }

    /// Opens the store at `path`, loading existing accounts if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let accounts: Vec<Account> = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No account file at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!("Loaded {} accounts from {}", accounts.len(), path.display());

        Ok(Self {
            path: Some(path),
            accounts: RwLock::new(accounts),
        })
    }

    /// Returns every account.
    pub async fn list(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    /// Returns up to `limit` accounts in registration order.
    pub async fn take(&self, limit: usize) -> Vec<Account> {
        self.accounts.read().await.iter().take(limit).cloned().collect()
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Looks an account up by id.
    pub async fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().await.iter().find(|a| a.id == id).cloned()
    }

    /// Looks an account up by phone number.
    pub async fn find_by_phone(&self, phone: &str) -> Option<Account> {
        self.accounts
            .read()
            .await
            .iter()
            .find(|a| a.phone_number == phone)
            .cloned()
    }

    /// Adds an account. Phone numbers are unique.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicatePhone`] if the phone is taken, or an
    /// I/O error if persisting fails (the insert is rolled back).
    pub async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;

        if accounts.iter().any(|a| a.phone_number == account.phone_number) {
            return Err(StoreError::DuplicatePhone(account.phone_number));
        }

        accounts.push(account.clone());

        if let Err(e) = self.persist(&accounts).await {
            accounts.pop(); // Rollback
            warn!("Failed to save accounts: {}", e);
            return Err(e);
        }

        info!("Stored account {} ({})", account.id, mask_phone(&account.phone_number));
        Ok(account)
    }

    /// Removes an account by id and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id, or an I/O error if
    /// persisting fails (the removal is rolled back).
    pub async fn remove(&self, id: &str) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;

        let Some(idx) = accounts.iter().position(|a| a.id == id) else {
            return Err(StoreError::NotFound(id.to_owned()));
        };

        let removed = accounts.remove(idx);

        if let Err(e) = self.persist(&accounts).await {
            accounts.insert(idx, removed); // Rollback
            warn!("Failed to save accounts: {}", e);
            return Err(e);
        }

        info!("Removed account {} ({})", removed.id, mask_phone(&removed.phone_number));
        Ok(removed)
    }

    async fn persist(&self, accounts: &[Account]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(accounts)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
