use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::types::{ChatId, MessageId, UserId};

use crate::platform::{
    BotIdentity, Capabilities, ChatMessage, JobFn, JobHandle, MemberStatus, OutgoingMessage,
    Person, Platform, PlatformError, RepeatingJob,
};

pub const CHAT: ChatId = ChatId(42);
pub const BOT_ID: UserId = UserId(9000);

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send { chat: ChatId, id: MessageId, message: OutgoingMessage },
    Delete { chat: ChatId, message: MessageId },
    Restrict { chat: ChatId, user: UserId, until: DateTime<Utc>, capabilities: Capabilities },
    Ban { chat: ChatId, user: UserId },
    Pin { chat: ChatId, message: MessageId },
    Unpin { chat: ChatId, message: Option<MessageId> },
    Photo { chat: ChatId, bytes: usize },
    Document { chat: ChatId, bytes: usize },
    Callback { query_id: String, text: String, alert: bool },
}

pub struct ScheduledOnce {
    pub delay: Duration,
    pub handle: JobHandle,
    job: Option<Box<dyn JobFn>>,
}

pub struct ScheduledRepeating {
    pub first: Duration,
    pub interval: Duration,
    pub handle: JobHandle,
    pub job: RepeatingJob,
}

/// Records every platform call; scheduled jobs run only when a test asks.
#[derive(Default)]
pub struct MockPlatform {
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<i32>,
    statuses: Mutex<HashMap<UserId, MemberStatus>>,
    failing_bans: Mutex<HashSet<UserId>>,
    protected: Mutex<HashSet<UserId>>,
    pub once: Mutex<Vec<ScheduledOnce>>,
    pub repeating: Mutex<Vec<ScheduledRepeating>>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: Mutex::new(1000),
            ..Default::default()
        })
    }

    pub fn set_status(&self, user: UserId, status: MemberStatus) {
        self.statuses.lock().unwrap().insert(user, status);
    }

    pub fn fail_bans_of(&self, user: UserId) {
        self.failing_bans.lock().unwrap().insert(user);
    }

    pub fn allow_bans_of(&self, user: UserId) {
        self.failing_bans.lock().unwrap().remove(&user);
    }

    /// Restrictions of `user` fail as if the bot lacked the rights.
    pub fn protect(&self, user: UserId) {
        self.protected.lock().unwrap().insert(user);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn sent(&self) -> Vec<(MessageId, OutgoingMessage)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { id, message, .. } => Some((id, message)),
                _ => None,
            })
            .collect()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, m)| m.text).collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn once_delays(&self) -> Vec<Duration> {
        self.once.lock().unwrap().iter().map(|j| j.delay).collect()
    }

    /// Runs every pending one-shot job that hasn't been cancelled.
    pub async fn run_once_jobs(&self) {
        let jobs: Vec<_> = {
            let mut once = self.once.lock().unwrap();
            once.iter_mut()
                .filter(|j| !j.handle.is_cancelled())
                .filter_map(|j| j.job.take())
                .collect()
        };
        for job in jobs {
            job.run().await;
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self) -> MessageId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        MessageId(*next)
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn send_message(
        &self,
        chat: ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageId, PlatformError> {
        let id = self.next_id();
        self.record(Call::Send { chat, id, message });
        Ok(id)
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), PlatformError> {
        self.record(Call::Delete { chat, message });
        Ok(())
    }

    async fn restrict_member(
        &self,
        chat: ChatId,
        user: UserId,
        until: DateTime<Utc>,
        capabilities: Capabilities,
    ) -> Result<(), PlatformError> {
        if self.protected.lock().unwrap().contains(&user) {
            return Err(PlatformError::Permission("not enough rights to restrict".into()));
        }
        self.record(Call::Restrict { chat, user, until, capabilities });
        Ok(())
    }

    async fn ban_member(&self, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
        if self.failing_bans.lock().unwrap().contains(&user) {
            return Err(PlatformError::Transient("flood control".into()));
        }
        self.record(Call::Ban { chat, user });
        Ok(())
    }

    async fn get_member_status(
        &self,
        _chat: ChatId,
        user: UserId,
    ) -> Result<MemberStatus, PlatformError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&user)
            .copied()
            .unwrap_or(MemberStatus::Member))
    }

    async fn pin_message(
        &self,
        chat: ChatId,
        message: MessageId,
        _silent: bool,
    ) -> Result<(), PlatformError> {
        self.record(Call::Pin { chat, message });
        Ok(())
    }

    async fn unpin_message(
        &self,
        chat: ChatId,
        message: Option<MessageId>,
    ) -> Result<(), PlatformError> {
        self.record(Call::Unpin { chat, message });
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        _file_name: &str,
    ) -> Result<MessageId, PlatformError> {
        self.record(Call::Photo { chat, bytes: bytes.len() });
        Ok(self.next_id())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        _file_name: &str,
    ) -> Result<MessageId, PlatformError> {
        self.record(Call::Document { chat, bytes: bytes.len() });
        Ok(self.next_id())
    }

    async fn answer_callback(
        &self,
        query_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), PlatformError> {
        self.record(Call::Callback {
            query_id: query_id.to_string(),
            text: text.to_string(),
            alert,
        });
        Ok(())
    }

    fn schedule_once(&self, delay: Duration, job: Box<dyn JobFn>) -> JobHandle {
        let handle = JobHandle::new(None);
        self.once.lock().unwrap().push(ScheduledOnce {
            delay,
            handle: handle.clone(),
            job: Some(job),
        });
        handle
    }

    fn schedule_repeating(
        &self,
        first: Duration,
        interval: Duration,
        job: RepeatingJob,
    ) -> JobHandle {
        let handle = JobHandle::new(None);
        self.repeating.lock().unwrap().push(ScheduledRepeating {
            first,
            interval,
            handle: handle.clone(),
            job,
        });
        handle
    }
}

pub fn bot_identity() -> BotIdentity {
    BotIdentity {
        id: BOT_ID,
        username: "vldc_bot".into(),
    }
}

pub fn person(id: u64) -> Person {
    Person {
        id: UserId(id),
        is_bot: false,
        first_name: format!("User{id}"),
        last_name: None,
        username: Some(format!("user{id}")),
    }
}

pub fn bot_person() -> Person {
    Person {
        id: BOT_ID,
        is_bot: true,
        first_name: "VLDC".into(),
        last_name: None,
        username: Some("vldc_bot".into()),
    }
}

pub fn message(id: i32, from: Person, text: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId(id),
        chat_id: CHAT,
        private: false,
        from: Some(from),
        text: Some(text.to_string()),
        reply_to: None,
        new_members: vec![],
        is_dice: false,
    }
}

pub fn reply(id: i32, from: Person, text: &str, to: ChatMessage) -> ChatMessage {
    ChatMessage {
        reply_to: Some(Box::new(to)),
        ..message(id, from, text)
    }
}

pub fn join(id: i32, members: Vec<Person>) -> ChatMessage {
    ChatMessage {
        text: None,
        new_members: members.clone(),
        ..message(id, members[0].clone(), "")
    }
}
