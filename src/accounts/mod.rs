//! Account registry and login lifecycle.

mod login;
mod store;

pub use login::{LoginError, LoginFlow, PendingLogins, wait_minutes};
pub use store::{Account, AccountStore, StoreError};
