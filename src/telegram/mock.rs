//! Recording provider double for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{
    ChannelHandle, InviteCheck, LoginAttempt, MessagingProvider, ProviderSession, SessionToken,
    TelegramError, VerifiedLogin,
};

pub(crate) const VALID_CODE: &str = "12345";

/// One provider call as seen by the double.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub token: String,
    pub op: String,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    channels: HashMap<String, ChannelHandle>,
    direct_invites: HashMap<String, ChannelHandle>,
    invites: HashMap<String, InviteCheck>,
    op_errors: HashMap<(String, String), TelegramError>,
    hanging: HashSet<String>,
    hanging_ops: HashSet<(String, String)>,
    password_phones: HashSet<String>,
    code_error: Option<TelegramError>,
    no_posts: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockProvider {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

pub(crate) fn token_for(phone: &str) -> String {
    format!("session-{phone}")
}

pub(crate) fn channel(id: i64, title: &str) -> ChannelHandle {
    ChannelHandle {
        id,
        access_hash: id * 10,
        title: title.to_owned(),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, username: &str, handle: ChannelHandle) -> Self {
        lock(&self.script).channels.insert(username.to_owned(), handle);
        self
    }

    pub fn with_direct_invite(self, link: &str, handle: ChannelHandle) -> Self {
        lock(&self.script).direct_invites.insert(link.to_owned(), handle);
        self
    }

    pub fn with_invite(self, hash: &str, check: InviteCheck) -> Self {
        lock(&self.script).invites.insert(hash.to_owned(), check);
        self
    }

    /// Makes `op` fail with `err` for the session identified by `token`.
    pub fn with_op_error(self, token: &str, op: &str, err: TelegramError) -> Self {
        lock(&self.script)
            .op_errors
            .insert((token.to_owned(), op.to_owned()), err);
        self
    }

    /// Makes every operation of `token`'s session hang forever.
    pub fn with_hanging(self, token: &str) -> Self {
        lock(&self.script).hanging.insert(token.to_owned());
        self
    }

    /// Makes only `op` hang for `token`'s session.
    pub fn with_hanging_op(self, token: &str, op: &str) -> Self {
        lock(&self.script)
            .hanging_ops
            .insert((token.to_owned(), op.to_owned()));
        self
    }

    pub fn with_password(self, phone: &str) -> Self {
        lock(&self.script).password_phones.insert(phone.to_owned());
        self
    }

    pub fn with_code_error(self, err: TelegramError) -> Self {
        lock(&self.script).code_error = Some(err);
        self
    }

    pub fn with_no_posts(self) -> Self {
        lock(&self.script).no_posts = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    pub fn calls_for(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn record(&self, token: &str, op: &str) {
        lock(&self.calls).push(Call {
            token: token.to_owned(),
            op: op.to_owned(),
            at: Instant::now(),
        });
    }

    async fn step(&self, token: &str, op: &str) -> Result<(), TelegramError> {
        self.record(token, op);
        let hanging = {
            let script = lock(&self.script);
            script.hanging.contains(token)
                || script.hanging_ops.contains(&(token.to_owned(), op.to_owned()))
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        match lock(&self.script)
            .op_errors
            .get(&(token.to_owned(), op.to_owned()))
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MessagingProvider for MockProvider {
    async fn connect(&self, token: &SessionToken) -> Result<Box<dyn ProviderSession>, TelegramError> {
        self.step(token.as_str(), "connect").await?;
        Ok(Box::new(MockSession {
            token: token.as_str().to_owned(),
            provider: self.clone(),
        }))
    }

    async fn request_code(&self, phone: &str) -> Result<Box<dyn LoginAttempt>, TelegramError> {
        self.record(phone, "request_code");
        if let Some(err) = lock(&self.script).code_error.clone() {
            return Err(err);
        }
        Ok(Box::new(MockLogin {
            phone: phone.to_owned(),
            provider: self.clone(),
        }))
    }

    async fn forget(&self, token: &SessionToken) -> Result<(), TelegramError> {
        self.record(token.as_str(), "forget");
        Ok(())
    }
}

struct MockLogin {
    phone: String,
    provider: MockProvider,
}

#[async_trait]
impl LoginAttempt for MockLogin {
    async fn verify(
        self: Box<Self>,
        code: &str,
        password: Option<&str>,
    ) -> Result<VerifiedLogin, TelegramError> {
        self.provider.record(&self.phone, "verify");
        if code != VALID_CODE {
            return Err(TelegramError::InvalidCode);
        }
        let needs_password = lock(&self.provider.script)
            .password_phones
            .contains(&self.phone);
        if needs_password && password.is_none() {
            return Err(TelegramError::PasswordRequired);
        }
        Ok(VerifiedLogin {
            token: SessionToken::new(token_for(&self.phone)),
            username: Some(format!("user{}", self.phone.trim_start_matches('+'))),
        })
    }

    async fn abort(self: Box<Self>) {
        self.provider.record(&self.phone, "abort");
    }
}

struct MockSession {
    token: String,
    provider: MockProvider,
}

impl MockSession {
    async fn step(&self, op: &str) -> Result<(), TelegramError> {
        self.provider.step(&self.token, op).await
    }
}

#[async_trait]
impl ProviderSession for MockSession {
    async fn resolve_username(&self, username: &str) -> Result<ChannelHandle, TelegramError> {
        self.step("resolve_username").await?;
        lock(&self.provider.script)
            .channels
            .get(username)
            .cloned()
            .ok_or_else(|| TelegramError::NotFound(username.to_owned()))
    }

    async fn resolve_channel_id(&self, id: i64) -> Result<ChannelHandle, TelegramError> {
        self.step("resolve_channel_id").await?;
        lock(&self.provider.script)
            .channels
            .values()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| TelegramError::NotFound(id.to_string()))
    }

    async fn resolve_invite_link(&self, link: &str) -> Result<ChannelHandle, TelegramError> {
        self.step("resolve_invite_link").await?;
        lock(&self.provider.script)
            .direct_invites
            .get(link)
            .cloned()
            .ok_or_else(|| TelegramError::NotFound(link.to_owned()))
    }

    async fn check_invite(&self, hash: &str) -> Result<InviteCheck, TelegramError> {
        self.step("check_invite").await?;
        lock(&self.provider.script)
            .invites
            .get(hash)
            .cloned()
            .ok_or_else(|| TelegramError::NotFound(hash.to_owned()))
    }

    async fn import_invite(&self, hash: &str) -> Result<ChannelHandle, TelegramError> {
        self.step("import_invite").await?;
        match lock(&self.provider.script).invites.get(hash) {
            Some(InviteCheck::Member(handle)) => Ok(handle.clone()),
            Some(InviteCheck::NotMember { title }) => Ok(channel(900, title)),
            None => Err(TelegramError::NotFound(hash.to_owned())),
        }
    }

    async fn join_channel(&self, _channel: &ChannelHandle) -> Result<(), TelegramError> {
        self.step("join_channel").await
    }

    async fn leave_channel(&self, _channel: &ChannelHandle) -> Result<(), TelegramError> {
        self.step("leave_channel").await
    }

    async fn mark_read(&self, _channel: &ChannelHandle) -> Result<(), TelegramError> {
        self.step("mark_read").await
    }

    async fn set_muted(&self, _channel: &ChannelHandle, muted: bool) -> Result<(), TelegramError> {
        self.step(if muted { "mute" } else { "unmute" }).await
    }

    async fn view_latest_post(&self, _channel: &ChannelHandle) -> Result<Option<i32>, TelegramError> {
        self.step("view").await?;
        let no_posts = lock(&self.provider.script).no_posts;
        Ok(if no_posts { None } else { Some(77) })
    }

    async fn join_live(&self, _channel: &ChannelHandle) -> Result<(), TelegramError> {
        self.step("join_live").await
    }

    async fn raise_hand(&self, _channel: &ChannelHandle) -> Result<(), TelegramError> {
        self.step("raise_hand").await
    }

    async fn leave_live(&self, _channel: &ChannelHandle) -> Result<(), TelegramError> {
        self.step("leave_live").await
    }

    async fn disconnect(self: Box<Self>) -> Result<(), TelegramError> {
        self.step("disconnect").await
    }
}
