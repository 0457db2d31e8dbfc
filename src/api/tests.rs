use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{AppState, router};
use crate::accounts::{Account, AccountStore, LoginFlow, PendingLogins};
use crate::actions::ActionExecutor;
use crate::scheduler::{JobRunner, JobTable};
use crate::telegram::mock::{MockProvider, VALID_CODE, channel, token_for};
use crate::telegram::{MessagingProvider, SessionToken, TelegramError};

const PHONES: [&str; 3] = ["+15550000001", "+15550000002", "+15550000003"];

struct Harness {
    app: Router,
    provider: MockProvider,
    store: Arc<AccountStore>,
}

async fn harness_with(provider: MockProvider, phones: &[&str], static_dir: PathBuf) -> Harness {
    let store = Arc::new(AccountStore::in_memory());
    for phone in phones {
        store
            .insert(Account::new(
                (*phone).to_owned(),
                SessionToken::new(token_for(phone)),
                String::new(),
            ))
            .await
            .unwrap();
    }

    let shared: Arc<dyn MessagingProvider> = Arc::new(provider.clone());
    let executor = Arc::new(ActionExecutor::new(Arc::clone(&shared), Duration::from_secs(15)));
    let runner = JobRunner::new(Arc::new(JobTable::new(100)), Arc::clone(&executor));
    let login = LoginFlow::new(
        shared,
        Arc::clone(&store),
        Arc::new(PendingLogins::new(Duration::from_secs(600))),
    );

    let app = router(AppState {
        store: Arc::clone(&store),
        login,
        runner,
        executor,
        static_dir,
    });

    Harness {
        app,
        provider,
        store,
    }
}

async fn harness(phones: &[&str]) -> Harness {
    let provider = MockProvider::new().with_channel("test_channel", channel(1, "Test"));
    harness_with(provider, phones, PathBuf::from("missing-static-dir")).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn field<'a>(jobs: &'a Value, name: &str) -> Vec<&'a Value> {
    jobs.as_array()
        .unwrap()
        .iter()
        .map(|job| &job[name])
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_join_channel_staggers_without_leave() {
    let h = harness(&PHONES).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/join-channel",
        Some(json!({
            "channelLink": "@test",
            "numberOfAccounts": 3,
            "joinDelayMinutes": 1,
            "stayDays": 0
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 3);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(field(&jobs, "delayMs"), vec![&json!(0), &json!(60_000), &json!(120_000)]);
    assert_eq!(field(&jobs, "action"), vec![&json!("join"); 3]);
}

#[tokio::test(start_paused = true)]
async fn test_join_channel_with_stay_schedules_leaves() {
    let h = harness(&PHONES).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/join-channel",
        Some(json!({
            "channelLink": "t.me/test_channel",
            "numberOfAccounts": "2",
            "joinDelayMinutes": "1",
            "stayDays": "1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 4);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(
        field(&jobs, "action"),
        vec![&json!("join"), &json!("leave"), &json!("join"), &json!("leave")]
    );
    assert_eq!(
        field(&jobs, "delayMs"),
        vec![
            &json!(0),
            &json!(86_400_000),
            &json!(60_000),
            &json!(86_460_000)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mute_schedules_auto_unmute() {
    let h = harness(&PHONES).await;

    let (status, _) = send(
        &h.app,
        "POST",
        "/api/mute-unmute",
        Some(json!({
            "channelLink": "@test_channel",
            "action": "mute",
            "duration": 10,
            "count": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(
        field(&jobs, "action"),
        vec![&json!("mute"), &json!("unmute"), &json!("mute"), &json!("unmute")]
    );
    assert_eq!(
        field(&jobs, "delayMs"),
        vec![&json!(0), &json!(600_000), &json!(0), &json!(600_000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unmute_has_no_reciprocal() {
    let h = harness(&PHONES).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/mute-unmute",
        Some(json!({
            "channelLink": "@test_channel",
            "action": "unmute",
            "duration": 10,
            "count": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 2);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(field(&jobs, "action"), vec![&json!("unmute"); 2]);
}

#[tokio::test]
async fn test_mute_rejects_unknown_action() {
    let h = harness(&PHONES).await;
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/mute-unmute",
        Some(json!({"channelLink": "@test_channel", "action": "snooze", "count": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_scheduling_without_accounts_is_rejected() {
    let h = harness(&[]).await;
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/join-channel",
        Some(json!({"channelLink": "@test", "numberOfAccounts": 3, "joinDelayMinutes": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No accounts available.");
}

#[tokio::test]
async fn test_malformed_bodies_are_rejected() {
    let h = harness(&PHONES).await;

    let (status, _) = send(
        &h.app,
        "POST",
        "/api/leave-channel",
        Some(json!({"channelLink": "@test", "count": "several"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        "POST",
        "/api/leave-channel",
        Some(json!({"channelLink": "  ", "count": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&h.app, "POST", "/api/leave-channel", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/join-channel",
        Some(json!({"channelLink": "@test", "numberOfAccounts": 1, "stayDays": 1.1e14})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "stayDays is too large.");
    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(jobs, json!([]));
}

#[tokio::test(start_paused = true)]
async fn test_add_views_fits_run_window() {
    let h = harness(&["+15550000001", "+15550000002", "+15550000003", "+15550000004"]).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/add-views",
        Some(json!({"channelLink": "@test_channel", "timeDelay": 30, "runMinutes": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 3);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(
        field(&jobs, "delayMs"),
        vec![&json!(0), &json!(30_000), &json!(60_000)]
    );
}

#[tokio::test]
async fn test_live_session_schedules_join_raise_leave() {
    let h = harness(&PHONES).await;
    let now = chrono::Utc::now();
    let join = now + chrono::TimeDelta::minutes(5);
    let leave = now + chrono::TimeDelta::minutes(30);

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/live-session",
        Some(json!({
            "channelLink": "@test_channel",
            "accountCount": 2,
            "joinTime": join.to_rfc3339(),
            "leaveTime": leave.timestamp_millis(),
            "raiseHandCount": 1,
            "raiseHandDelay": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 5);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(
        field(&jobs, "action"),
        vec![
            &json!("join_live"),
            &json!("raise_hand"),
            &json!("leave_live"),
            &json!("join_live"),
            &json!("leave_live")
        ]
    );
}

#[tokio::test]
async fn test_live_session_drops_raise_hands_past_leave_time() {
    let h = harness(&PHONES).await;
    let now = chrono::Utc::now();

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/live-session",
        Some(json!({
            "channelLink": "@test_channel",
            "accountCount": 3,
            "joinTime": (now + chrono::TimeDelta::minutes(5)).to_rfc3339(),
            "leaveTime": (now + chrono::TimeDelta::minutes(10)).to_rfc3339(),
            "raiseHandCount": 3,
            "raiseHandDelay": 3
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 7);

    let (_, jobs) = send(&h.app, "GET", "/api/jobs", None).await;
    assert_eq!(
        field(&jobs, "action"),
        vec![
            &json!("join_live"),
            &json!("raise_hand"),
            &json!("leave_live"),
            &json!("join_live"),
            &json!("leave_live"),
            &json!("join_live"),
            &json!("leave_live")
        ]
    );
}

#[tokio::test]
async fn test_live_session_rejects_reversed_times() {
    let h = harness(&PHONES).await;
    let now = chrono::Utc::now();

    let (status, _) = send(
        &h.app,
        "POST",
        "/api/live-session",
        Some(json!({
            "channelLink": "@test_channel",
            "accountCount": 1,
            "joinTime": (now + chrono::TimeDelta::minutes(30)).to_rfc3339(),
            "leaveTime": (now + chrono::TimeDelta::minutes(5)).to_rfc3339()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_can_be_inspected_and_cancelled() {
    let h = harness(&PHONES).await;

    let (_, body) = send(
        &h.app,
        "POST",
        "/api/join-channel",
        Some(json!({"channelLink": "@test_channel", "numberOfAccounts": 2, "joinDelayMinutes": 5})),
    )
    .await;
    let later = body["jobIds"][1].as_str().unwrap().to_owned();

    let (status, job) = send(&h.app, "GET", &format!("/api/jobs/{later}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "scheduled");

    let (status, body) = send(&h.app, "DELETE", &format!("/api/jobs/{later}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "cancelled");

    let (status, _) = send(&h.app, "DELETE", &format!("/api/jobs/{later}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&h.app, "GET", "/api/jobs/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.provider.calls_for("join_channel").len(), 1);
}

#[tokio::test]
async fn test_accounts_are_listed_without_tokens() {
    let h = harness(&PHONES[..1]).await;
    let (status, body) = send(&h.app, "GET", "/api/accounts", None).await;

    assert_eq!(status, StatusCode::OK);
    let accounts = body.as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["phoneNumber"], PHONES[0]);
    assert!(accounts[0].get("sessionToken").is_none());
}

#[tokio::test]
async fn test_login_round_trip() {
    let h = harness(&[]).await;
    let phone = "+15550001234";

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/send-code",
        Some(json!({"phoneNumber": phone})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Code sent successfully.");

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/verify-code",
        Some(json!({"phoneNumber": phone, "code": VALID_CODE, "password": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["account"]["username"], "user15550001234");
    assert!(body["account"].get("sessionToken").is_none());

    let stored = h.store.find_by_phone(phone).await.unwrap();
    assert_eq!(stored.session_token.as_str(), token_for(phone));

    let (status, _) = send(
        &h.app,
        "POST",
        "/api/send-code",
        Some(json!({"phoneNumber": phone})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_verify_without_pending_login() {
    let h = harness(&[]).await;
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/verify-code",
        Some(json!({"phoneNumber": "+15550001234", "code": VALID_CODE})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_send_code_flood_wait_is_429() {
    let provider = MockProvider::new().with_code_error(TelegramError::FloodWait(90));
    let h = harness_with(provider, &[], PathBuf::from("missing-static-dir")).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/send-code",
        Some(json!({"phoneNumber": "+15550001234"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], "Rate limited. Please wait 2 minutes.");
}

#[tokio::test]
async fn test_delete_account_leaves_then_removes() {
    let h = harness(&PHONES[..2]).await;
    let id = h.store.find_by_phone(PHONES[0]).await.unwrap().id;

    let (status, body) = send(
        &h.app,
        "DELETE",
        &format!("/api/accounts/{id}"),
        Some(json!({"channelLink": "@test_channel"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(h.provider.calls_for("leave_channel").len(), 1);
    assert!(h.store.get(&id).await.is_none());
    assert_eq!(h.store.len().await, 1);

    let forgotten = h.provider.calls_for("forget");
    assert_eq!(forgotten.len(), 1);
    assert_eq!(forgotten[0].token, token_for(PHONES[0]));
}

#[tokio::test]
async fn test_delete_account_survives_failed_leave() {
    let provider = MockProvider::new().with_op_error(
        &token_for(PHONES[0]),
        "connect",
        TelegramError::NotAuthorized,
    );
    let h = harness_with(provider, &PHONES[..1], PathBuf::from("missing-static-dir")).await;
    let id = h.store.find_by_phone(PHONES[0]).await.unwrap().id;

    let (status, _) = send(
        &h.app,
        "DELETE",
        &format!("/api/accounts/{id}"),
        Some(json!({"channelLink": "@test_channel"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_delete_without_body_and_unknown_id() {
    let h = harness(&PHONES[..1]).await;
    let id = h.store.find_by_phone(PHONES[0]).await.unwrap().id;

    let (status, _) = send(&h.app, "DELETE", "/api/accounts/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&h.app, "DELETE", &format!("/api/accounts/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Account removed.");
    assert_eq!(h.provider.ops(), vec!["forget"]);
}

#[tokio::test]
async fn test_index_page() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>crew</h1>").unwrap();
    let h = harness_with(MockProvider::new(), &[], dir.path().to_path_buf()).await;

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"<h1>crew</h1>");

    let missing = harness(&[]).await;
    let (status, _) = send(&missing.app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
