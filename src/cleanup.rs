use std::sync::{Arc, Weak};
use std::time::Duration;

use teloxide::types::{ChatId, MessageId};

use crate::platform::{ChatMessage, Platform};

/// Deferred deletion of bot output and the commands that triggered it.
#[derive(Clone)]
pub struct Cleanup {
    platform: Weak<dyn Platform>,
}

impl Cleanup {
    pub fn new(platform: &Arc<dyn Platform>) -> Self {
        Self {
            platform: Arc::downgrade(platform),
        }
    }

    pub fn schedule(&self, chat: ChatId, message: MessageId, delay: Duration) {
        let Some(platform) = self.platform.upgrade() else {
            return;
        };

        let weak = self.platform.clone();
        platform.schedule_once(
            delay,
            Box::new(move || async move {
                let Some(platform) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = platform.delete_message(chat, message).await {
                    log::info!("Cleanup of message {} in {chat} failed: {e}", message.0);
                }
            }),
        );
    }

    /// Always removes `response`; the command and the message it replied to on request.
    pub fn schedule_reply(
        &self,
        command: &ChatMessage,
        response: MessageId,
        delay: Duration,
        remove_cmd: bool,
        remove_reply: bool,
    ) {
        self.schedule(command.chat_id, response, delay);

        if remove_cmd {
            self.schedule(command.chat_id, command.id, delay);
        }

        if remove_reply {
            if let Some(replied) = &command.reply_to {
                self.schedule(command.chat_id, replied.id, delay);
            }
        }
    }
}
