//! Endpoint handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Html;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::AppState;
use super::error::ApiError;
use super::types::{
    AccountView, AddViewsRequest, DeleteAccountRequest, JoinChannelRequest, LeaveChannelRequest,
    LiveSessionRequest, MessageResponse, MuteUnmuteRequest, ScheduledResponse, SendCodeRequest,
    VerifyCodeRequest, VerifyCodeResponse, channel_link, count, days, minutes, seconds,
};
use crate::accounts::Account;
use crate::actions::AccountAction;
use crate::scheduler::{JobRecord, Reciprocal, StaggerPlan};
use crate::telegram::mask_phone;

type ApiResult<T> = Result<Json<T>, ApiError>;
type Payload<T> = Result<Json<T>, JsonRejection>;

const NO_ACCOUNTS: &str = "No accounts available.";

async fn pick_accounts(state: &AppState, limit: usize) -> Result<Vec<Account>, ApiError> {
    let accounts = state.store.take(limit).await;
    if accounts.is_empty() {
        return Err(ApiError::validation(NO_ACCOUNTS));
    }
    Ok(accounts)
}

/// `GET /`: the front end's index page.
pub async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let path = state.static_dir.join("index.html");
    tokio::fs::read_to_string(&path).await.map(Html).map_err(|e| {
        debug!("Cannot serve {}: {}", path.display(), e);
        ApiError::not_found("Index page not found")
    })
}

/// `GET /api/accounts`: every account, without session tokens.
pub async fn list_accounts(State(state): State<Arc<AppState>>) -> Json<Vec<AccountView>> {
    Json(
        state
            .store
            .list()
            .await
            .into_iter()
            .map(AccountView::from)
            .collect(),
    )
}

/// `POST /api/send-code`
pub async fn send_code(
    State(state): State<Arc<AppState>>,
    payload: Payload<SendCodeRequest>,
) -> ApiResult<MessageResponse> {
    let Json(req) = payload?;
    state.login.send_code(&req.phone_number).await?;
    Ok(Json(MessageResponse::ok("Code sent successfully.")))
}

/// `POST /api/verify-code`
pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    payload: Payload<VerifyCodeRequest>,
) -> ApiResult<VerifyCodeResponse> {
    let Json(req) = payload?;
    let password = req.password.as_deref().filter(|p| !p.is_empty());
    let account = state
        .login
        .verify_code(&req.phone_number, &req.code, password)
        .await?;

    Ok(Json(VerifyCodeResponse {
        success: true,
        message: "Account verified and saved.".to_owned(),
        account: account.into(),
    }))
}

/// `DELETE /api/accounts/{id}`: optional best-effort leave, then removal.
///
/// The body is optional; clients usually send none.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<MessageResponse> {
    let req: DeleteAccountRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DeleteAccountRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::validation(format!("Invalid request body: {e}")))?
    };

    let account = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    let link = req
        .channel_link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    if let Some(link) = link {
        match state
            .executor
            .execute(&account, link, AccountAction::Leave)
            .await
        {
            Ok(outcome) => debug!("Leave before removal: {}", outcome.detail()),
            Err(e) => warn!(
                "Leave before removal failed for {}: {}",
                mask_phone(&account.phone_number),
                e
            ),
        }
    }

    state.login.remove_account(&id).await?;

    Ok(Json(MessageResponse::ok(if link.is_some() {
        "Account removed and left channel if joined."
    } else {
        "Account removed."
    })))
}

/// Reciprocal of `action` after `delay`; a zero delay means none.
fn undo_after(action: AccountAction, delay: Duration) -> Option<Reciprocal> {
    action
        .reciprocal()
        .filter(|_| !delay.is_zero())
        .map(|action| Reciprocal { action, delay })
}

/// `POST /api/join-channel`: staggered join, then staggered leave after
/// `stayDays` days (none when zero).
pub async fn join_channel(
    State(state): State<Arc<AppState>>,
    payload: Payload<JoinChannelRequest>,
) -> ApiResult<ScheduledResponse> {
    let Json(req) = payload?;
    let link = channel_link(&req.channel_link)?;
    let limit = count(req.number_of_accounts, "numberOfAccounts")?;
    let interval = minutes(req.join_delay_minutes, "joinDelayMinutes")?;
    let stay = days(req.stay_days, "stayDays")?;

    let accounts = pick_accounts(&state, limit).await?;
    let reciprocal = undo_after(AccountAction::Join, stay);

    let job_ids = state
        .runner
        .schedule_staggered(StaggerPlan {
            accounts,
            channel_link: link,
            action: AccountAction::Join,
            start: Duration::ZERO,
            interval,
            reciprocal,
        })
        .await;

    Ok(Json(ScheduledResponse::new("Join process started.", job_ids)))
}

/// `POST /api/leave-channel`
pub async fn leave_channel(
    State(state): State<Arc<AppState>>,
    payload: Payload<LeaveChannelRequest>,
) -> ApiResult<ScheduledResponse> {
    let Json(req) = payload?;
    let link = channel_link(&req.channel_link)?;
    let limit = count(req.count, "count")?;
    let interval = minutes(req.interval_minutes, "intervalMinutes")?;

    let accounts = pick_accounts(&state, limit).await?;
    let job_ids = state
        .runner
        .schedule_staggered(StaggerPlan {
            accounts,
            channel_link: link,
            action: AccountAction::Leave,
            start: Duration::ZERO,
            interval,
            reciprocal: None,
        })
        .await;

    Ok(Json(ScheduledResponse::new("Leave process started.", job_ids)))
}

/// `POST /api/mute-unmute`: a mute with a positive `duration` (minutes)
/// gets a matching unmute per account.
pub async fn mute_unmute(
    State(state): State<Arc<AppState>>,
    payload: Payload<MuteUnmuteRequest>,
) -> ApiResult<ScheduledResponse> {
    let Json(req) = payload?;
    let link = channel_link(&req.channel_link)?;
    let action = match AccountAction::parse(&req.action) {
        Some(action @ (AccountAction::Mute | AccountAction::Unmute)) => action,
        _ => return Err(ApiError::validation("action must be 'mute' or 'unmute'.")),
    };
    let auto_unmute = minutes(req.duration, "duration")?;
    let limit = count(req.count, "count")?;
    let interval = minutes(req.interval_minutes, "intervalMinutes")?;

    let accounts = pick_accounts(&state, limit).await?;
    let reciprocal = undo_after(action, auto_unmute);

    let job_ids = state
        .runner
        .schedule_staggered(StaggerPlan {
            accounts,
            channel_link: link,
            action,
            start: Duration::ZERO,
            interval,
            reciprocal,
        })
        .await;

    Ok(Json(ScheduledResponse::new(
        format!("{} process started.", capitalize(action.name())),
        job_ids,
    )))
}

/// `POST /api/add-views`: one view per account, `timeDelay` seconds apart,
/// for as many accounts as fit in `runMinutes`.
pub async fn add_views(
    State(state): State<Arc<AppState>>,
    payload: Payload<AddViewsRequest>,
) -> ApiResult<ScheduledResponse> {
    let Json(req) = payload?;
    let link = channel_link(&req.channel_link)?;
    let interval = seconds(req.time_delay, "timeDelay")?;
    let window = minutes(req.run_minutes, "runMinutes")?;

    let limit = views_that_fit(window, interval, state.store.len().await);
    let accounts = pick_accounts(&state, limit).await?;

    let job_ids = state
        .runner
        .schedule_staggered(StaggerPlan {
            accounts,
            channel_link: link,
            action: AccountAction::View,
            start: Duration::ZERO,
            interval,
            reciprocal: None,
        })
        .await;

    Ok(Json(ScheduledResponse::new("View process started.", job_ids)))
}

/// Number of accounts whose offset `i * interval` stays within `window`.
fn views_that_fit(window: Duration, interval: Duration, available: usize) -> usize {
    if interval.is_zero() {
        return available;
    }
    let fit = window.as_nanos() / interval.as_nanos() + 1;
    usize::try_from(fit).map_or(available, |fit| fit.min(available))
}

/// `POST /api/live-session`: everyone joins at `joinTime`, the first
/// `raiseHandCount` accounts raise a hand `raiseHandDelay` minutes apart,
/// and everyone leaves at `leaveTime`.
pub async fn live_session(
    State(state): State<Arc<AppState>>,
    payload: Payload<LiveSessionRequest>,
) -> ApiResult<ScheduledResponse> {
    let Json(req) = payload?;
    let link = channel_link(&req.channel_link)?;
    let limit = count(req.account_count, "accountCount")?;
    let join_at = req
        .join_time
        .ok_or_else(|| ApiError::validation("joinTime is required."))?;
    let leave_at = req
        .leave_time
        .ok_or_else(|| ApiError::validation("leaveTime is required."))?;
    let raise_hands = count(req.raise_hand_count.or(Some(0.0)), "raiseHandCount")?;
    let hand_gap = minutes(req.raise_hand_delay, "raiseHandDelay")?;

    if leave_at <= join_at {
        return Err(ApiError::validation("leaveTime must be after joinTime."));
    }
    let now = Utc::now();
    if leave_at <= now {
        return Err(ApiError::validation("leaveTime must be in the future."));
    }

    let join_delay = (join_at - now).to_std().unwrap_or(Duration::ZERO);
    let leave_delay = (leave_at - now).to_std().unwrap_or(Duration::ZERO);

    let accounts = pick_accounts(&state, limit).await?;
    let mut job_ids = Vec::new();

    for (i, account) in accounts.into_iter().enumerate() {
        job_ids.push(
            state
                .runner
                .schedule_at(account.clone(), &link, AccountAction::JoinLive, join_delay)
                .await,
        );

        if i < raise_hands {
            let step = u32::try_from(i + 1).unwrap_or(u32::MAX);
            let raise_delay = join_delay.saturating_add(hand_gap.saturating_mul(step));
            if raise_delay < leave_delay {
                job_ids.push(
                    state
                        .runner
                        .schedule_at(account.clone(), &link, AccountAction::RaiseHand, raise_delay)
                        .await,
                );
            } else {
                debug!(
                    "Raise hand for {} would fall after leaveTime, skipped",
                    mask_phone(&account.phone_number)
                );
            }
        }

        job_ids.push(
            state
                .runner
                .schedule_at(account, &link, AccountAction::LeaveLive, leave_delay)
                .await,
        );
    }

    info!(
        "Live session on {} scheduled: join in {}s, leave in {}s",
        link,
        join_delay.as_secs(),
        leave_delay.as_secs()
    );

    Ok(Json(ScheduledResponse::new(
        "Live session scheduled.",
        job_ids,
    )))
}

/// `GET /api/jobs`
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.runner.jobs().list().await)
}

/// `GET /api/jobs/{id}`
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<JobRecord> {
    state
        .runner
        .jobs()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job not found: {id}")))
}

/// `DELETE /api/jobs/{id}`: cancels a job that has not fired yet.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let job = state.runner.jobs().cancel(&id).await?;
    info!("Cancelled job {} ({} for {})", job.id, job.action, job.phone);

    Ok(Json(json!({
        "success": true,
        "message": "Job cancelled.",
        "job": job,
    })))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}
