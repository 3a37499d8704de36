use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::future::BoxFuture;
use teloxide::types::{ChatId, MessageId};

use crate::commands::Command;
use crate::database::{Database, QuarantineEntry, HELLO_RETENTION_HOURS};
use crate::error::Result;
use crate::llm::{self, Classifier};
use crate::messages;
use crate::modes::ModeHooks;
use crate::platform::{
    BotIdentity, CallbackQuery, ChatMessage, JobHandle, OutgoingMessage, Person, Platform,
    RepeatingJob,
};
use crate::router::{self, on_command, Handler, HandlerExt, Response};

/// Time a newcomer has to introduce themselves.
pub const QUARANTINE_MINUTES: i64 = 60;
/// Shortest acceptable introduction, in characters.
pub const MIN_BIO_LENGTH: usize = 15;
pub const BOT_BUTTON_PAYLOAD: &str = "42";

pub const FILTER_GROUP: i32 = -10;

const BAN_JOB_INTERVAL: Duration = Duration::from_secs(60);

/// Newcomer onboarding for the managed chat.
pub struct Quarantine {
    chat: ChatId,
    platform: Arc<dyn Platform>,
    db: Database,
    me: BotIdentity,
    classifier: Option<Arc<dyn Classifier>>,
    ban_job: Mutex<Option<JobHandle>>,
}

impl Quarantine {
    pub fn new(
        chat: ChatId,
        platform: Arc<dyn Platform>,
        db: Database,
        me: BotIdentity,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            chat,
            platform,
            db,
            me,
            classifier,
            ban_job: Mutex::new(None),
        })
    }

    async fn delete(&self, message: MessageId) {
        if let Err(e) = self.platform.delete_message(self.chat, message).await {
            log::info!("Couldn't delete message {} in {}: {e}", message.0, self.chat);
        }
    }

    async fn delete_related(&self, entry: &QuarantineEntry) {
        for id in &entry.related_message_ids {
            self.delete(*id).await;
        }
    }

    pub async fn on_new_members(&self, message: &ChatMessage) -> Result<Response> {
        for member in &message.new_members {
            if member.id == self.me.id {
                self.introduce_myself(message, member).await?;
                continue;
            }
            if self.db.is_trusted(member.id).await? {
                log::info!("{} is trusted, skipping quarantine", member.id);
                continue;
            }
            self.greet(message, member).await?;
        }
        Ok(Response::Done)
    }

    async fn greet(&self, join: &ChatMessage, member: &Person) -> Result<Option<MessageId>> {
        self.db.add_quarantine(member.id, QUARANTINE_MINUTES).await?;
        log::info!("{} joined {}, quarantined for {QUARANTINE_MINUTES} min", member.id, self.chat);

        let greeting = OutgoingMessage::markdown(messages::greeting(member, QUARANTINE_MINUTES))
            .reply_to(join.id)
            .button(messages::random_bot_phrase(), BOT_BUTTON_PAYLOAD);
        match self.platform.send_message(self.chat, greeting).await {
            Ok(id) => {
                self.db.add_quarantine_rel_message(member.id, id).await?;
                Ok(Some(id))
            }
            Err(e) => {
                log::warn!("Couldn't greet {}: {e}", member.id);
                Ok(None)
            }
        }
    }

    async fn introduce_myself(&self, join: &ChatMessage, me: &Person) -> Result<()> {
        let Some(greeting) = self.greet(join, me).await? else {
            return Ok(());
        };

        let intro = OutgoingMessage::plain(messages::SELF_INTRO).reply_to(greeting);
        match self.platform.send_message(self.chat, intro).await {
            Ok(id) => {
                self.db.add_quarantine_rel_message(me.id, id).await?;
            }
            Err(e) => log::warn!("Couldn't introduce myself: {e}"),
        }

        self.db.remove_quarantine(me.id).await?;
        if let Err(e) = self
            .platform
            .send_message(self.chat, OutgoingMessage::plain(messages::WELCOME))
            .await
        {
            log::warn!("Couldn't welcome myself: {e}");
        }
        Ok(())
    }

    /// Gatekeeps everything a quarantined user says.
    pub async fn filter(&self, message: &ChatMessage) -> Result<Response> {
        let Some(person) = &message.from else {
            return Ok(Response::Done);
        };
        let Some(entry) = self.db.get_quarantine(person.id).await? else {
            return Ok(Response::Done);
        };

        let Some(replied) = message
            .reply_to
            .as_deref()
            .filter(|r| r.sender_id() == Some(self.me.id))
        else {
            self.delete(message.id).await;
            return Ok(Response::Consumed);
        };

        let text = message.text();
        if text.chars().count() < MIN_BIO_LENGTH {
            self.delete(message.id).await;
            let feedback =
                OutgoingMessage::markdown(messages::bio_too_short(person)).reply_to(replied.id);
            match self.platform.send_message(self.chat, feedback).await {
                Ok(id) => {
                    self.db.add_quarantine_rel_message(person.id, id).await?;
                }
                Err(e) => log::warn!("Couldn't send feedback to {}: {e}", person.id),
            }
            return Ok(Response::Consumed);
        }

        if !llm::is_worthy(self.classifier.as_deref(), text).await {
            log::info!("Introduction of {} looks like spam", person.id);
            self.delete(message.id).await;
            return Ok(Response::Consumed);
        }

        self.admit(message, person, &entry).await?;
        Ok(Response::Consumed)
    }

    async fn admit(&self, bio: &ChatMessage, person: &Person, entry: &QuarantineEntry) -> Result<()> {
        if !self.db.remove_quarantine(person.id).await? {
            log::debug!("{} was already admitted", person.id);
            return Ok(());
        }
        self.delete_related(entry).await;
        self.db
            .save_hello(person.id, &person.full_name(), bio.text(), bio.id)
            .await?;
        log::info!("{} passed quarantine", person.id);

        match self.platform.pin_message(self.chat, bio.id, true).await {
            Ok(()) => self.schedule_unpin(bio.id),
            Err(e) => log::warn!("Couldn't pin introduction of {}: {e}", person.id),
        }

        let welcome = OutgoingMessage::plain(messages::WELCOME).reply_to(bio.id);
        if let Err(e) = self.platform.send_message(self.chat, welcome).await {
            log::warn!("Couldn't welcome {}: {e}", person.id);
        }
        Ok(())
    }

    fn schedule_unpin(&self, message: MessageId) {
        let chat = self.chat;
        let platform = Arc::downgrade(&self.platform);
        self.platform.schedule_once(
            Duration::from_secs(HELLO_RETENTION_HOURS as u64 * 3600),
            Box::new(move || async move {
                let Some(platform) = platform.upgrade() else {
                    return;
                };
                if let Err(e) = platform.unpin_message(chat, Some(message)).await {
                    log::info!("Couldn't unpin introduction {}: {e}", message.0);
                }
            }),
        );
    }

    /// Bans everyone whose deadline passed before `now`. Failed bans stay
    /// queued for the next run.
    pub async fn ban_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut banned = 0;
        for entry in self.db.get_expired_quarantine(now).await? {
            if let Err(e) = self.platform.ban_member(self.chat, entry.user_id).await {
                log::warn!("Couldn't ban {}: {e}", entry.user_id);
                continue;
            }
            self.delete_related(&entry).await;
            self.db.remove_quarantine(entry.user_id).await?;
            log::info!("Banned {} after quarantine deadline", entry.user_id);
            banned += 1;
        }

        let purged = self.db.remove_expired_hello(now).await?;
        if purged > 0 {
            log::debug!("Purged {purged} expired introductions");
        }
        Ok(banned)
    }

    pub fn start_ban_job(self: &Arc<Self>) {
        let mut ban_job = self.ban_job.lock().unwrap_or_else(|e| e.into_inner());
        if ban_job.as_ref().is_some_and(|job| !job.is_cancelled()) {
            return;
        }

        let quarantine: Weak<Self> = Arc::downgrade(self);
        let job: RepeatingJob = Arc::new(move || {
            let quarantine = quarantine.clone();
            Box::pin(async move {
                let Some(quarantine) = quarantine.upgrade() else {
                    return;
                };
                if let Err(e) = quarantine.ban_expired(Utc::now()).await {
                    log::error!("Quarantine ban job failed: {e}");
                }
            }) as BoxFuture<'static, ()>
        });
        *ban_job = Some(
            self.platform
                .schedule_repeating(BAN_JOB_INTERVAL, BAN_JOB_INTERVAL, job),
        );
        log::info!("Quarantine ban job started");
    }

    pub fn stop_ban_job(&self) {
        let mut ban_job = self.ban_job.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(job) = ban_job.take() {
            job.cancel();
            log::info!("Quarantine ban job stopped");
        }
    }

    /// Answers the decoy button. Returns whether the query was ours.
    pub async fn on_button(&self, query: &CallbackQuery) -> Result<bool> {
        if query.data.as_deref() != Some(BOT_BUTTON_PAYLOAD) {
            return Ok(false);
        }
        log::info!("{} pressed the bot button", query.from.id);
        self.platform
            .answer_callback(&query.id, messages::BOT_BUTTON_ALERT, true)
            .await?;
        Ok(true)
    }

    /// `/hellomsg` as a reply: the stored introduction of that user.
    pub async fn hello_msg(&self, message: &ChatMessage) -> Result<Response> {
        let Some(user) = message.reply_to.as_ref().and_then(|r| r.sender_id()) else {
            return Ok(router::reply(
                &*self.platform,
                message,
                OutgoingMessage::markdown(messages::reply_required()),
            )
            .await);
        };

        let text = match self.db.get_hello(user, Utc::now()).await? {
            Some(hello) => messages::hello_info(&hello),
            None => messages::no_hello(),
        };
        Ok(router::reply(&*self.platform, message, OutgoingMessage::markdown(text)).await)
    }

    /// Everything the `quarantine` mode attaches to the managed chat.
    pub fn handlers(self: &Arc<Self>) -> Vec<(i32, Arc<dyn Handler>)> {
        let quarantine = self.clone();
        vec![
            (FILTER_GROUP, NewMembers(self.clone()).boxed()),
            (FILTER_GROUP, Filter(self.clone()).boxed()),
            (
                0,
                on_command(
                    &self.me.username,
                    |c| matches!(c, Command::Hellomsg),
                    move |message, _| {
                        let quarantine = quarantine.clone();
                        async move { quarantine.hello_msg(&message).await }
                    },
                )
                .admin_only(&self.platform)
                .boxed(),
            ),
        ]
    }
}

struct NewMembers(Arc<Quarantine>);

#[async_trait]
impl Handler for NewMembers {
    fn check(&self, message: &ChatMessage) -> bool {
        !message.new_members.is_empty()
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        self.0.on_new_members(message).await
    }
}

struct Filter(Arc<Quarantine>);

#[async_trait]
impl Handler for Filter {
    fn check(&self, message: &ChatMessage) -> bool {
        message.new_members.is_empty() && message.from.is_some()
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        self.0.filter(message).await
    }
}

/// Runs the ban job while the mode is on. Turning it off forgives everyone.
pub struct QuarantineHooks(pub Arc<Quarantine>);

#[async_trait]
impl ModeHooks for QuarantineHooks {
    async fn on_enable(&self, _chat: ChatId) -> Result<()> {
        self.0.start_ban_job();
        Ok(())
    }

    async fn on_disable(&self, _chat: ChatId) -> Result<()> {
        self.0.stop_ban_job();
        let released = self.0.db.remove_all_quarantine().await?;
        log::info!("Quarantine off, released {released} users");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as TimeDelta;
    use teloxide::types::UserId;

    use super::*;
    use crate::llm::LlmError;
    use crate::platform::MemberStatus;
    use crate::router::{Router, Scope};
    use crate::testing::{self, Call, MockPlatform, CHAT};

    struct Verdict(&'static str);

    #[async_trait]
    impl Classifier for Verdict {
        async fn classify(&self, _text: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    const NEWCOMER: u64 = 100;

    struct Fixture {
        mock: Arc<MockPlatform>,
        db: Database,
        quarantine: Arc<Quarantine>,
        router: Router,
    }

    async fn setup(verdict: &'static str) -> Fixture {
        let mock = MockPlatform::new();
        let db = Database::in_memory().await.unwrap();
        let quarantine = Quarantine::new(
            CHAT,
            mock.clone(),
            db.clone(),
            testing::bot_identity(),
            Some(Arc::new(Verdict(verdict))),
        );
        let router = Router::new();
        router.add_all("quarantine", Scope::Chat(CHAT), &quarantine.handlers());
        Fixture {
            mock,
            db,
            quarantine,
            router,
        }
    }

    /// Joins the newcomer and returns the greeting's id.
    async fn join(f: &Fixture) -> MessageId {
        f.router
            .dispatch(&testing::join(10, vec![testing::person(NEWCOMER)]))
            .await
            .unwrap();
        let (greeting, message) = f.mock.sent()[0].clone();
        assert_eq!(message.reply_to, Some(MessageId(10)));
        assert_eq!(
            message.button.map(|b| b.payload),
            Some(BOT_BUTTON_PAYLOAD.to_string())
        );
        f.mock.clear();
        greeting
    }

    fn answer(id: i32, text: &str, greeting: MessageId) -> ChatMessage {
        testing::reply(
            id,
            testing::person(NEWCOMER),
            text,
            testing::message(greeting.0, testing::bot_person(), "greeting"),
        )
    }

    #[tokio::test]
    async fn short_bio_keeps_quarantine() {
        let f = setup("legit").await;
        let greeting = join(&f).await;

        f.router.dispatch(&answer(11, "Hi!", greeting)).await.unwrap();

        assert_eq!(f.mock.deleted(), vec![MessageId(11)]);
        let entry = f.db.get_quarantine(UserId(NEWCOMER)).await.unwrap().unwrap();
        assert_eq!(entry.deadline - entry.created_at, TimeDelta::minutes(QUARANTINE_MINUTES));
        let (feedback, message) = f.mock.sent()[0].clone();
        assert_eq!(message.reply_to, Some(greeting));
        assert_eq!(entry.related_message_ids, vec![greeting, feedback]);
    }

    #[tokio::test]
    async fn valid_bio_admits() {
        let f = setup("legit").await;
        let greeting = join(&f).await;

        let bio = answer(11, "I am a developer from Vladivostok", greeting);
        f.router.dispatch(&bio).await.unwrap();

        assert!(!f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
        let hello = f.db.get_hello(UserId(NEWCOMER), Utc::now()).await.unwrap().unwrap();
        assert_eq!(hello.message_id, 11);
        assert_eq!(hello.expires_at - hello.accepted_at, TimeDelta::hours(48));

        let calls = f.mock.calls();
        assert!(calls.contains(&Call::Delete { chat: CHAT, message: greeting }));
        assert!(calls.contains(&Call::Pin { chat: CHAT, message: MessageId(11) }));
        assert_eq!(f.mock.sent_texts(), vec![messages::WELCOME]);
        assert_eq!(f.mock.once_delays(), vec![Duration::from_secs(48 * 3600)]);

        f.mock.run_once_jobs().await;
        assert!(f.mock.calls().contains(&Call::Unpin {
            chat: CHAT,
            message: Some(MessageId(11))
        }));
    }

    #[tokio::test]
    async fn admission_happens_once() {
        let f = setup("legit").await;
        let greeting = join(&f).await;
        let entry = f.db.get_quarantine(UserId(NEWCOMER)).await.unwrap().unwrap();
        let bio = answer(11, "I am a developer from Vladivostok", greeting);
        let person = testing::person(NEWCOMER);

        let (first, second) = tokio::join!(
            f.quarantine.admit(&bio, &person, &entry),
            f.quarantine.admit(&bio, &person, &entry),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(f.mock.sent_texts(), vec![messages::WELCOME]);
        let pins = f.mock.calls().into_iter().filter(|c| matches!(c, Call::Pin { .. })).count();
        assert_eq!(pins, 1);
        assert_eq!(f.mock.once_delays().len(), 1);
    }

    #[tokio::test]
    async fn spam_bio_is_deleted() {
        let f = setup("spam").await;
        let greeting = join(&f).await;

        f.router
            .dispatch(&answer(11, "Best crypto signals, DM me now", greeting))
            .await
            .unwrap();
        assert_eq!(f.mock.deleted(), vec![MessageId(11)]);
        assert!(f.mock.sent().is_empty());
        assert!(f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
    }

    #[tokio::test]
    async fn quarantined_chatter_is_deleted() {
        let f = setup("legit").await;
        join(&f).await;

        let plain = testing::message(11, testing::person(NEWCOMER), "hello everyone, I'm new here");
        f.router.dispatch(&plain).await.unwrap();
        let elsewhere = testing::reply(
            12,
            testing::person(NEWCOMER),
            "I am a developer from Vladivostok",
            testing::message(5, testing::person(1), "who are you?"),
        );
        f.router.dispatch(&elsewhere).await.unwrap();
        let regular = testing::message(13, testing::person(1), "hi");
        f.router.dispatch(&regular).await.unwrap();

        assert_eq!(f.mock.deleted(), vec![MessageId(11), MessageId(12)]);
        assert!(f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
    }

    #[tokio::test]
    async fn deadline_bans() {
        let f = setup("legit").await;
        let greeting = join(&f).await;

        assert_eq!(f.quarantine.ban_expired(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + TimeDelta::seconds(3601);
        assert_eq!(f.quarantine.ban_expired(later).await.unwrap(), 1);

        let calls = f.mock.calls();
        assert!(calls.contains(&Call::Ban { chat: CHAT, user: UserId(NEWCOMER) }));
        assert!(calls.contains(&Call::Delete { chat: CHAT, message: greeting }));
        assert!(!f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
    }

    #[tokio::test]
    async fn failed_ban_is_retried() {
        let f = setup("legit").await;
        join(&f).await;
        f.mock.fail_bans_of(UserId(NEWCOMER));

        let later = Utc::now() + TimeDelta::seconds(3601);
        assert_eq!(f.quarantine.ban_expired(later).await.unwrap(), 0);
        assert!(f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
        assert!(f.mock.deleted().is_empty());

        f.mock.allow_bans_of(UserId(NEWCOMER));
        assert_eq!(f.quarantine.ban_expired(later).await.unwrap(), 1);
        assert!(!f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
    }

    #[tokio::test]
    async fn trusted_users_skip_quarantine() {
        let f = setup("legit").await;
        f.db.trust(UserId(NEWCOMER), UserId(1)).await.unwrap();

        f.router
            .dispatch(&testing::join(10, vec![testing::person(NEWCOMER)]))
            .await
            .unwrap();
        assert!(f.mock.sent().is_empty());
        assert!(!f.db.is_in_quarantine(UserId(NEWCOMER)).await.unwrap());
    }

    #[tokio::test]
    async fn bot_introduces_itself() {
        let f = setup("legit").await;
        f.router
            .dispatch(&testing::join(10, vec![testing::bot_person()]))
            .await
            .unwrap();

        let sent = f.mock.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].1.reply_to, Some(sent[0].0));
        assert_eq!(sent[1].1.text, messages::SELF_INTRO);
        assert_eq!(sent[2].1.text, messages::WELCOME);
        assert!(!f.db.is_in_quarantine(testing::BOT_ID).await.unwrap());
    }

    #[tokio::test]
    async fn bot_button_alerts() {
        let f = setup("legit").await;
        let query = CallbackQuery {
            id: "q1".into(),
            from: testing::person(NEWCOMER),
            data: Some(BOT_BUTTON_PAYLOAD.into()),
        };
        assert!(f.quarantine.on_button(&query).await.unwrap());
        assert_eq!(
            f.mock.calls(),
            vec![Call::Callback {
                query_id: "q1".into(),
                text: messages::BOT_BUTTON_ALERT.into(),
                alert: true
            }]
        );

        let other = CallbackQuery {
            data: Some("7".into()),
            ..query
        };
        assert!(!f.quarantine.on_button(&other).await.unwrap());
    }

    #[tokio::test]
    async fn hooks_drive_the_ban_job() {
        let f = setup("legit").await;
        let hooks = QuarantineHooks(f.quarantine.clone());
        join(&f).await;

        hooks.on_enable(CHAT).await.unwrap();
        hooks.on_enable(CHAT).await.unwrap();
        {
            let repeating = f.mock.repeating.lock().unwrap();
            assert_eq!(repeating.len(), 1);
            assert_eq!(repeating[0].first, BAN_JOB_INTERVAL);
            assert_eq!(repeating[0].interval, BAN_JOB_INTERVAL);
        }

        hooks.on_disable(CHAT).await.unwrap();
        assert!(f.mock.repeating.lock().unwrap()[0].handle.is_cancelled());
        assert!(f.db.get_all_quarantine().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hellomsg_shows_the_introduction() {
        let f = setup("legit").await;
        let greeting = join(&f).await;
        let bio = answer(11, "I am a developer from Vladivostok", greeting);
        f.router.dispatch(&bio).await.unwrap();
        f.mock.clear();

        f.mock.set_status(UserId(1), MemberStatus::Administrator);
        let command = testing::reply(20, testing::person(1), "/hellomsg", bio);
        f.router.dispatch(&command).await.unwrap();

        let text = &f.mock.sent_texts()[0];
        assert!(text.contains("I am a developer from Vladivostok"));

        let by_member = testing::reply(
            21,
            testing::person(2),
            "/hellomsg",
            testing::message(11, testing::person(NEWCOMER), "x"),
        );
        f.mock.clear();
        f.router.dispatch(&by_member).await.unwrap();
        assert!(f.mock.sent().is_empty());
    }
}
