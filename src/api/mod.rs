//! HTTP façade.
//!
//! Maps the REST endpoints used by the front end onto the login flow, the
//! account store and the job runner. Scheduling endpoints answer as soon as
//! the jobs are registered.

mod error;
mod handlers;
#[cfg(test)]
mod tests;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

pub use error::ApiError;

use crate::accounts::{AccountStore, LoginFlow};
use crate::actions::ActionExecutor;
use crate::scheduler::JobRunner;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<AccountStore>,
    pub login: LoginFlow,
    pub runner: JobRunner,
    /// Used directly for the leave that precedes an account removal.
    pub executor: Arc<ActionExecutor>,
    /// Directory holding `index.html`.
    pub static_dir: PathBuf,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/api/accounts", get(handlers::list_accounts))
        .route("/api/accounts/{id}", delete(handlers::delete_account))
        .route("/api/send-code", post(handlers::send_code))
        .route("/api/verify-code", post(handlers::verify_code))
        .route("/api/join-channel", post(handlers::join_channel))
        .route("/api/leave-channel", post(handlers::leave_channel))
        .route("/api/mute-unmute", post(handlers::mute_unmute))
        .route("/api/add-views", post(handlers::add_views))
        .route("/api/live-session", post(handlers::live_session))
        .route("/api/jobs", get(handlers::list_jobs))
        .route(
            "/api/jobs/{id}",
            get(handlers::get_job).delete(handlers::cancel_job),
        )
        .with_state(Arc::new(state))
}
