//! grammers-backed implementation of the messaging provider.
//!
//! Each account owns one SQLite session file under the sessions directory;
//! the file name is the account's opaque [`SessionToken`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::client::LoginToken;
use grammers_client::{sender, Client, SenderPool, SignInError};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provider::{
    ChannelHandle, InviteCheck, LoginAttempt, MessagingProvider, ProviderSession, SessionToken,
    VerifiedLogin,
};
use super::{TelegramError, mask_phone};
use crate::config::TelegramConfig;

/// One live MTProto connection.
struct Connection {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl Connection {
    async fn open(path: &Path, api_id: i32) -> Result<Self, TelegramError> {
        let session = Arc::new(
            SqliteSession::open(path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            handle: handle.thin,
            _pool_task: pool_task,
        })
    }

    fn quit(&self) {
        self.handle.quit();
    }
}

/// Provider that talks to Telegram through grammers.
#[derive(Debug, Clone)]
pub struct GrammersProvider {
    config: TelegramConfig,
}

impl GrammersProvider {
    /// Creates the provider, making sure the sessions directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created.
    pub async fn new(config: TelegramConfig) -> Result<Self, TelegramError> {
        tokio::fs::create_dir_all(&config.sessions_dir)
            .await
            .map_err(|e| TelegramError::Session(e.to_string()))?;

        info!("Session files live in {}", config.sessions_dir.display());
        Ok(Self { config })
    }

    fn session_path(&self, token: &SessionToken) -> Result<PathBuf, TelegramError> {
        let name = token.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(TelegramError::Session("malformed session token".to_owned()));
        }
        Ok(self.config.sessions_dir.join(name))
    }
}

#[async_trait]
impl MessagingProvider for GrammersProvider {
    async fn connect(&self, token: &SessionToken) -> Result<Box<dyn ProviderSession>, TelegramError> {
        let path = self.session_path(token)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TelegramError::Session(format!(
                "session file {} is missing",
                path.display()
            )));
        }

        let conn = Connection::open(&path, self.config.api_id).await?;

        let authorized = match conn.client.is_authorized().await {
            Ok(authorized) => authorized,
            Err(e) => {
                conn.quit();
                return Err(TelegramError::Connection(e.to_string()));
            }
        };
        if !authorized {
            conn.quit();
            return Err(TelegramError::NotAuthorized);
        }

        Ok(Box::new(GrammersSession { conn }))
    }

    async fn request_code(&self, phone: &str) -> Result<Box<dyn LoginAttempt>, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        let file_name = format!("{}.session", Uuid::new_v4());
        let path = self.config.sessions_dir.join(&file_name);
        let conn = Connection::open(&path, self.config.api_id).await?;

        match conn
            .client
            .request_login_code(phone, &self.config.api_hash)
            .await
        {
            Ok(token) => Ok(Box::new(GrammersLoginAttempt {
                conn,
                token,
                file_name,
                path,
            })),
            Err(e) => {
                conn.quit();
                remove_session_file(&path).await;
                Err(e.into())
            }
        }
    }

    async fn forget(&self, token: &SessionToken) -> Result<(), TelegramError> {
        let path = self.session_path(token)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted session file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TelegramError::Session(format!(
                "cannot delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Login waiting for the code the user received.
struct GrammersLoginAttempt {
    conn: Connection,
    token: LoginToken,
    file_name: String,
    path: PathBuf,
}

#[async_trait]
impl LoginAttempt for GrammersLoginAttempt {
    async fn verify(
        self: Box<Self>,
        code: &str,
        password: Option<&str>,
    ) -> Result<VerifiedLogin, TelegramError> {
        info!("Signing in with login code...");

        let signed_in = match self.conn.client.sign_in(&self.token, code).await {
            Ok(user) => Ok(user),
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                match password.filter(|p| !p.is_empty()) {
                    Some(password) => self
                        .conn
                        .client
                        .check_password(password_token, password)
                        .await
                        .map_err(sign_in_error),
                    None => Err(TelegramError::PasswordRequired),
                }
            }
            Err(e) => Err(sign_in_error(e)),
        };

        self.conn.quit();

        match signed_in {
            Ok(user) => {
                info!("Successfully signed in!");
                Ok(VerifiedLogin {
                    token: SessionToken::new(self.file_name),
                    username: user.username().map(str::to_owned),
                })
            }
            Err(e) => {
                remove_session_file(&self.path).await;
                Err(e)
            }
        }
    }

    async fn abort(self: Box<Self>) {
        self.conn.quit();
        remove_session_file(&self.path).await;
    }
}

fn sign_in_error(err: SignInError) -> TelegramError {
    match err {
        SignInError::InvalidCode => TelegramError::InvalidCode,
        SignInError::InvalidPassword(_) => TelegramError::InvalidPassword,
        SignInError::PasswordRequired(_) => TelegramError::PasswordRequired,
        other => match TelegramError::from_message(&other.to_string()) {
            TelegramError::Invocation(msg) => TelegramError::SignInFailed(msg),
            kind => kind,
        },
    }
}

async fn remove_session_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Could not remove session file {}: {}", path.display(), e);
    }
}

/// Session for an authorized account.
struct GrammersSession {
    conn: Connection,
}

impl GrammersSession {
    async fn active_call(
        &self,
        channel: &ChannelHandle,
    ) -> Result<tl::enums::InputGroupCall, TelegramError> {
        let request = tl::functions::channels::GetFullChannel {
            channel: input_channel(channel),
        };
        let tl::enums::messages::ChatFull::Full(full) = self.conn.client.invoke(&request).await?;

        match full.full_chat {
            tl::enums::ChatFull::ChannelFull(channel_full) => {
                channel_full.call.ok_or(TelegramError::NoActiveCall)
            }
            tl::enums::ChatFull::Full(_) => Err(TelegramError::NoActiveCall),
        }
    }
}

#[async_trait]
impl ProviderSession for GrammersSession {
    async fn resolve_username(&self, username: &str) -> Result<ChannelHandle, TelegramError> {
        let request = tl::functions::contacts::ResolveUsername {
            username: username.to_owned(),
            referer: None,
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) =
            self.conn.client.invoke(&request).await?;

        first_channel(resolved.chats).ok_or_else(|| TelegramError::NotFound(username.to_owned()))
    }

    async fn resolve_channel_id(&self, id: i64) -> Result<ChannelHandle, TelegramError> {
        let request = tl::functions::channels::GetChannels {
            id: vec![tl::enums::InputChannel::Channel(tl::types::InputChannel {
                channel_id: id,
                access_hash: 0,
            })],
        };
        let chats = match self.conn.client.invoke(&request).await? {
            tl::enums::messages::Chats::Chats(chats) => chats.chats,
            tl::enums::messages::Chats::Slice(slice) => slice.chats,
        };

        first_channel(chats).ok_or_else(|| TelegramError::NotFound(id.to_string()))
    }

    async fn resolve_invite_link(&self, link: &str) -> Result<ChannelHandle, TelegramError> {
        // grammers keeps no link-to-peer cache, so invite links always go
        // through the invite check.
        Err(TelegramError::NotFound(link.to_owned()))
    }

    async fn check_invite(&self, hash: &str) -> Result<InviteCheck, TelegramError> {
        let request = tl::functions::messages::CheckChatInvite {
            hash: hash.to_owned(),
        };

        match self.conn.client.invoke(&request).await? {
            tl::enums::ChatInvite::Already(already) => first_channel(vec![already.chat])
                .map(InviteCheck::Member)
                .ok_or_else(|| TelegramError::NotFound(hash.to_owned())),
            tl::enums::ChatInvite::Invite(invite) => Ok(InviteCheck::NotMember {
                title: invite.title,
            }),
            tl::enums::ChatInvite::Peek(peek) => Ok(InviteCheck::NotMember {
                title: first_channel(vec![peek.chat])
                    .map(|c| c.title)
                    .unwrap_or_default(),
            }),
        }
    }

    async fn import_invite(&self, hash: &str) -> Result<ChannelHandle, TelegramError> {
        let request = tl::functions::messages::ImportChatInvite {
            hash: hash.to_owned(),
        };
        let chats = match self.conn.client.invoke(&request).await? {
            tl::enums::Updates::Combined(data) => data.chats,
            tl::enums::Updates::Updates(data) => data.chats,
            _ => Vec::new(),
        };

        first_channel(chats).ok_or_else(|| TelegramError::NotFound(hash.to_owned()))
    }

    async fn join_channel(&self, channel: &ChannelHandle) -> Result<(), TelegramError> {
        let request = tl::functions::channels::JoinChannel {
            channel: input_channel(channel),
        };
        self.conn.client.invoke(&request).await?;
        Ok(())
    }

    async fn leave_channel(&self, channel: &ChannelHandle) -> Result<(), TelegramError> {
        let request = tl::functions::channels::LeaveChannel {
            channel: input_channel(channel),
        };
        self.conn.client.invoke(&request).await?;
        Ok(())
    }

    async fn mark_read(&self, channel: &ChannelHandle) -> Result<(), TelegramError> {
        let request = tl::functions::channels::ReadHistory {
            channel: input_channel(channel),
            max_id: 0,
        };
        self.conn.client.invoke(&request).await?;
        Ok(())
    }

    async fn set_muted(&self, channel: &ChannelHandle, muted: bool) -> Result<(), TelegramError> {
        let request = tl::functions::account::UpdateNotifySettings {
            peer: tl::enums::InputNotifyPeer::Peer(tl::types::InputNotifyPeer {
                peer: input_peer(channel),
            }),
            settings: tl::enums::InputPeerNotifySettings::Settings(
                tl::types::InputPeerNotifySettings {
                    show_previews: None,
                    silent: None,
                    mute_until: Some(if muted { i32::MAX } else { 0 }),
                    sound: None,
                    stories_muted: None,
                    stories_hide_sender: None,
                    stories_sound: None,
                },
            ),
        };
        self.conn.client.invoke(&request).await?;
        Ok(())
    }

    async fn view_latest_post(&self, channel: &ChannelHandle) -> Result<Option<i32>, TelegramError> {
        let history = tl::functions::messages::GetHistory {
            peer: input_peer(channel),
            offset_id: 0,
            offset_date: 0,
            add_offset: 0,
            limit: 1,
            max_id: 0,
            min_id: 0,
            hash: 0,
        };
        let messages = match self.conn.client.invoke(&history).await? {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => Vec::new(),
        };

        let latest = messages.into_iter().find_map(|message| match message {
            tl::enums::Message::Message(m) => Some(m.id),
            tl::enums::Message::Service(m) => Some(m.id),
            tl::enums::Message::Empty(_) => None,
        });
        let Some(post_id) = latest else {
            return Ok(None);
        };

        let request = tl::functions::messages::GetMessagesViews {
            peer: input_peer(channel),
            id: vec![post_id],
            increment: true,
        };
        self.conn.client.invoke(&request).await?;
        Ok(Some(post_id))
    }

    async fn join_live(&self, channel: &ChannelHandle) -> Result<(), TelegramError> {
        let call = self.active_call(channel).await?;
        let params = format!(
            r#"{{"ufrag":"","pwd":"","fingerprints":[],"ssrc":{}}}"#,
            random_ssrc()
        );

        let request = tl::functions::phone::JoinGroupCall {
            muted: true,
            video_stopped: true,
            call,
            join_as: tl::enums::InputPeer::PeerSelf,
            invite_hash: None,
            params: tl::enums::DataJson::Json(tl::types::DataJson { data: params }),
        };

        match self.conn.client.invoke(&request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err: TelegramError = e.into();
                if matches!(&err, TelegramError::Invocation(msg) if msg.contains("GROUPCALL_ALREADY_PARTICIPANT"))
                {
                    return Err(TelegramError::AlreadyParticipant);
                }
                Err(err)
            }
        }
    }

    async fn raise_hand(&self, channel: &ChannelHandle) -> Result<(), TelegramError> {
        match self.join_live(channel).await {
            Ok(()) | Err(TelegramError::AlreadyParticipant) => {}
            Err(e) => return Err(e),
        }

        let request = tl::functions::phone::EditGroupCallParticipant {
            call: self.active_call(channel).await?,
            participant: tl::enums::InputPeer::PeerSelf,
            muted: None,
            volume: None,
            raise_hand: Some(true),
            video_stopped: None,
            video_paused: None,
            presentation_paused: None,
        };
        self.conn.client.invoke(&request).await?;
        Ok(())
    }

    async fn leave_live(&self, channel: &ChannelHandle) -> Result<(), TelegramError> {
        let request = tl::functions::phone::LeaveGroupCall {
            call: self.active_call(channel).await?,
            source: 0,
        };
        self.conn.client.invoke(&request).await?;
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), TelegramError> {
        self.conn.quit();
        Ok(())
    }
}

/// Random positive 31-bit source id for joining a call.
fn random_ssrc() -> u32 {
    u32::try_from(Uuid::new_v4().as_u128() & 0x7FFF_FFFF).unwrap_or(1)
}

fn input_channel(channel: &ChannelHandle) -> tl::enums::InputChannel {
    tl::enums::InputChannel::Channel(tl::types::InputChannel {
        channel_id: channel.id,
        access_hash: channel.access_hash,
    })
}

fn input_peer(channel: &ChannelHandle) -> tl::enums::InputPeer {
    tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
        channel_id: channel.id,
        access_hash: channel.access_hash,
    })
}

/// Picks the first broadcast channel or supergroup out of a chat list.
fn first_channel(chats: Vec<tl::enums::Chat>) -> Option<ChannelHandle> {
    let found = chats.into_iter().find_map(|chat| match chat {
        tl::enums::Chat::Channel(channel) => Some(ChannelHandle {
            id: channel.id,
            access_hash: channel.access_hash.unwrap_or(0),
            title: channel.title,
        }),
        _ => None,
    });

    if found.is_none() {
        warn!("Provider returned no channel in chat list");
    }
    found
}

impl std::fmt::Debug for GrammersSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammersSession").finish_non_exhaustive()
    }
}
