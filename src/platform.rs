mod telegram;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, MessageId, UserId};
use thiserror::Error;

pub use telegram::TelegramPlatform;

#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("insufficient rights: {0}")]
    Permission(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Other(String),
}

/// A chat participant as far as the moderation core cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: UserId,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Person {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }

    /// `@username` when there is one, the full name otherwise.
    pub fn handle(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.full_name(),
        }
    }
}

/// Inbound message, decoupled from the wire types.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub private: bool,
    pub from: Option<Person>,
    pub text: Option<String>,
    pub reply_to: Option<Box<ChatMessage>>,
    pub new_members: Vec<Person>,
    pub is_dice: bool,
}

impl ChatMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn sender_id(&self) -> Option<UserId> {
        self.from.as_ref().map(|p| p.id)
    }
}

#[derive(Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Person,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn is_admin(self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

/// What a restricted member is still allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub send_messages: bool,
    pub send_media: bool,
    pub send_other: bool,
    pub web_previews: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        send_messages: false,
        send_media: false,
        send_other: false,
        web_previews: false,
    };

    pub const ALL: Capabilities = Capabilities {
        send_messages: true,
        send_media: true,
        send_other: true,
        web_previews: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub caption: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub button: Option<Button>,
    pub markdown: bool,
    pub silent: bool,
}

impl OutgoingMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Text already escaped for MarkdownV2.
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: true,
            ..Default::default()
        }
    }

    pub fn reply_to(mut self, message: MessageId) -> Self {
        self.reply_to = Some(message);
        self
    }

    pub fn button(mut self, caption: impl Into<String>, payload: impl Into<String>) -> Self {
        self.button = Some(Button {
            caption: caption.into(),
            payload: payload.into(),
        });
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

pub trait JobFn: Send + 'static {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
}

impl<T, F: Future<Output = ()> + Send + 'static> JobFn for T
where
    T: (FnOnce() -> F) + Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(self()) as BoxFuture<'static, ()>
    }
}

pub type RepeatingJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancels a scheduled job. Dropping the handle does not cancel.
#[derive(Debug, Clone, Default)]
pub struct JobHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<tokio::task::AbortHandle>,
}

impl JobHandle {
    pub fn new(task: Option<tokio::task::AbortHandle>) -> Self {
        Self {
            cancelled: Default::default(),
            task,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything the moderation core needs from the chat platform.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    async fn send_message(
        &self,
        chat: ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageId, PlatformError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), PlatformError>;

    async fn restrict_member(
        &self,
        chat: ChatId,
        user: UserId,
        until: DateTime<Utc>,
        capabilities: Capabilities,
    ) -> Result<(), PlatformError>;

    async fn ban_member(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError>;

    async fn get_member_status(
        &self,
        chat: ChatId,
        user: UserId,
    ) -> Result<MemberStatus, PlatformError>;

    async fn pin_message(
        &self,
        chat: ChatId,
        message: MessageId,
        silent: bool,
    ) -> Result<(), PlatformError>;

    async fn unpin_message(
        &self,
        chat: ChatId,
        message: Option<MessageId>,
    ) -> Result<(), PlatformError>;

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, PlatformError>;

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, PlatformError>;

    async fn answer_callback(
        &self,
        query_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), PlatformError>;

    fn schedule_once(&self, delay: Duration, job: Box<dyn JobFn>) -> JobHandle;

    fn schedule_repeating(&self, first: Duration, interval: Duration, job: RepeatingJob)
        -> JobHandle;
}

/// Admin in a chat: creator or administrator there, or anyone in a private chat.
pub async fn is_admin(platform: &dyn Platform, message: &ChatMessage) -> bool {
    if message.private {
        return true;
    }
    let Some(user) = message.sender_id() else {
        return false;
    };

    match platform.get_member_status(message.chat_id, user).await {
        Ok(status) => status.is_admin(),
        Err(e) => {
            log::warn!("Couldn't get status of {user} in {}: {e}", message.chat_id);
            false
        }
    }
}

/// Who the bot itself is, needed to tell replies-to-the-bot apart and to parse `/cmd@bot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    pub username: String,
}
