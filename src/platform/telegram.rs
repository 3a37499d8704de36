use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::{
    ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
    Recipient, ReplyParameters, User, UserId,
};
use teloxide::{ApiError, RequestError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{
    BotIdentity, CallbackQuery, Capabilities, ChatMessage, JobFn, JobHandle, MemberStatus,
    OutgoingMessage, Person, Platform, PlatformError, RepeatingJob,
};

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn identity(&self) -> Result<BotIdentity, PlatformError> {
        let me = self.bot.get_me().await.map_err(map_error)?;
        Ok(BotIdentity {
            id: me.user.id,
            username: me.user.username.clone().unwrap_or_default(),
        })
    }

    pub async fn resolve_chat(&self, username: &str) -> Result<ChatId, PlatformError> {
        let chat = self
            .bot
            .get_chat(Recipient::ChannelUsername(username.to_string()))
            .await
            .map_err(map_error)?;
        Ok(chat.id)
    }
}

fn map_error(err: RequestError) -> PlatformError {
    let text = err.to_string();
    match err {
        RequestError::Api(ApiError::MessageToDeleteNotFound | ApiError::MessageCantBeDeleted) => {
            PlatformError::NotFound(text)
        }
        RequestError::Api(
            ApiError::NotEnoughRightsToRestrict
            | ApiError::NotEnoughRightsToPinMessage
            | ApiError::NotEnoughRightsToManagePins
            | ApiError::NotEnoughRightsToChangeChatPermissions
            | ApiError::CantRestrictSelf,
        ) => PlatformError::Permission(text),
        // teloxide has no variant for restricting an admin
        RequestError::Api(ApiError::Unknown(ref description))
            if description.to_lowercase().contains("user is an administrator of the chat") =>
        {
            PlatformError::Permission(text)
        }
        RequestError::RetryAfter(_) | RequestError::Network(_) => PlatformError::Transient(text),
        _ => PlatformError::Other(text),
    }
}

fn permissions(capabilities: Capabilities) -> ChatPermissions {
    let mut permissions = ChatPermissions::empty();
    if capabilities.send_messages {
        permissions |= ChatPermissions::SEND_MESSAGES;
    }
    if capabilities.send_media {
        permissions |= ChatPermissions::SEND_AUDIOS
            | ChatPermissions::SEND_DOCUMENTS
            | ChatPermissions::SEND_PHOTOS
            | ChatPermissions::SEND_VIDEOS
            | ChatPermissions::SEND_VIDEO_NOTES
            | ChatPermissions::SEND_VOICE_NOTES;
    }
    if capabilities.send_other {
        permissions |= ChatPermissions::SEND_OTHER_MESSAGES | ChatPermissions::SEND_POLLS;
    }
    if capabilities.web_previews {
        permissions |= ChatPermissions::ADD_WEB_PAGE_PREVIEWS;
    }
    permissions
}

impl From<&User> for Person {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            is_bot: user.is_bot,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            chat_id: msg.chat.id,
            private: msg.chat.is_private(),
            from: msg.from.as_ref().map(Person::from),
            text: msg.text().or_else(|| msg.caption()).map(str::to_owned),
            reply_to: msg
                .reply_to_message()
                .map(|reply| Box::new(ChatMessage::from(reply))),
            new_members: msg
                .new_chat_members()
                .map(|members| members.iter().map(Person::from).collect())
                .unwrap_or_default(),
            is_dice: msg.dice().is_some(),
        }
    }
}

impl From<&teloxide::types::CallbackQuery> for CallbackQuery {
    fn from(query: &teloxide::types::CallbackQuery) -> Self {
        Self {
            id: query.id.to_string(),
            from: Person::from(&query.from),
            data: query.data.clone(),
        }
    }
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn send_message(
        &self,
        chat: ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageId, PlatformError> {
        let mut request = self.bot.send_message(chat, message.text);

        if message.markdown {
            request = request.parse_mode(ParseMode::MarkdownV2);
        }
        if let Some(reply_to) = message.reply_to {
            request = request.reply_parameters(ReplyParameters::new(reply_to));
        }
        if let Some(button) = message.button {
            request = request.reply_markup(InlineKeyboardMarkup::new([[
                InlineKeyboardButton::callback(button.caption, button.payload),
            ]]));
        }
        if message.silent {
            request = request.disable_notification(true);
        }

        let sent = request.await.map_err(map_error)?;
        Ok(sent.id)
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), PlatformError> {
        self.bot
            .delete_message(chat, message)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn restrict_member(
        &self,
        chat: ChatId,
        user: UserId,
        until: DateTime<Utc>,
        capabilities: Capabilities,
    ) -> Result<(), PlatformError> {
        self.bot
            .restrict_chat_member(chat, user, permissions(capabilities))
            .until_date(until)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn ban_member(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        self.bot
            .ban_chat_member(chat, user)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn get_member_status(
        &self,
        chat: ChatId,
        user: UserId,
    ) -> Result<MemberStatus, PlatformError> {
        let member = self
            .bot
            .get_chat_member(chat, user)
            .await
            .map_err(map_error)?;

        let kind = &member.kind;
        let status = if kind.is_owner() {
            MemberStatus::Creator
        } else if kind.is_administrator() {
            MemberStatus::Administrator
        } else if kind.is_restricted() {
            MemberStatus::Restricted
        } else if kind.is_left() {
            MemberStatus::Left
        } else if kind.is_banned() {
            MemberStatus::Kicked
        } else {
            MemberStatus::Member
        };
        Ok(status)
    }

    async fn pin_message(
        &self,
        chat: ChatId,
        message: MessageId,
        silent: bool,
    ) -> Result<(), PlatformError> {
        self.bot
            .pin_chat_message(chat, message)
            .disable_notification(silent)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn unpin_message(
        &self,
        chat: ChatId,
        message: Option<MessageId>,
    ) -> Result<(), PlatformError> {
        let mut request = self.bot.unpin_chat_message(chat);
        if let Some(message) = message {
            request = request.message_id(message);
        }
        request.await.map(|_| ()).map_err(map_error)
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, PlatformError> {
        let file = InputFile::memory(bytes).file_name(file_name.to_string());
        let sent = self.bot.send_photo(chat, file).await.map_err(map_error)?;
        Ok(sent.id)
    }

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, PlatformError> {
        let file = InputFile::memory(bytes).file_name(file_name.to_string());
        let sent = self
            .bot
            .send_document(chat, file)
            .await
            .map_err(map_error)?;
        Ok(sent.id)
    }

    async fn answer_callback(
        &self,
        query_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), PlatformError> {
        self.bot
            .answer_callback_query(query_id.to_string())
            .text(text.to_string())
            .show_alert(alert)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    fn schedule_once(&self, delay: Duration, job: Box<dyn JobFn>) -> JobHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.run().await;
        });
        JobHandle::new(Some(task.abort_handle()))
    }

    fn schedule_repeating(
        &self,
        first: Duration,
        interval: Duration,
        job: RepeatingJob,
    ) -> JobHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        });
        JobHandle::new(Some(task.abort_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(err: ApiError) -> PlatformError {
        map_error(RequestError::Api(err))
    }

    #[test]
    fn missing_rights_are_permission_errors() {
        for err in [
            ApiError::NotEnoughRightsToRestrict,
            ApiError::NotEnoughRightsToPinMessage,
            ApiError::NotEnoughRightsToManagePins,
            ApiError::NotEnoughRightsToChangeChatPermissions,
            ApiError::CantRestrictSelf,
        ] {
            assert!(matches!(api(err), PlatformError::Permission(_)));
        }
    }

    #[test]
    fn restricting_an_admin_is_a_permission_error() {
        let err = ApiError::Unknown("Bad Request: user is an administrator of the chat".into());
        assert!(matches!(api(err), PlatformError::Permission(_)));
    }

    #[test]
    fn other_errors_keep_their_class() {
        assert!(matches!(api(ApiError::MessageToDeleteNotFound), PlatformError::NotFound(_)));
        assert!(matches!(api(ApiError::Unknown("RandomError".into())), PlatformError::Other(_)));
        assert!(matches!(api(ApiError::BotBlocked), PlatformError::Other(_)));
    }
}
