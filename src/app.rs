use std::sync::Arc;
use std::time::Duration;

use teloxide::types::ChatId;

use crate::cleanup::Cleanup;
use crate::commands::{self, Command};
use crate::database::Database;
use crate::error::Result;
use crate::llm::Classifier;
use crate::messages;
use crate::modes::{ModeController, ModeSpec, COMMANDS_GROUP};
use crate::mute;
use crate::platform::{BotIdentity, CallbackQuery, ChatMessage, OutgoingMessage, Platform};
use crate::quarantine::{Quarantine, QuarantineHooks};
use crate::roulette::Roulette;
use crate::router::{self, on_command, Handler, HandlerExt, Response, Router, Scope};

const CORE: &str = "core";
const TRUST_CLEANUP: Duration = Duration::from_secs(10);

/// The moderation core wired together for one managed chat.
pub struct App {
    chat: ChatId,
    platform: Arc<dyn Platform>,
    router: Arc<Router>,
    modes: Arc<ModeController>,
    quarantine: Arc<Quarantine>,
}

impl App {
    pub async fn new(
        chat: ChatId,
        platform: Arc<dyn Platform>,
        db: Database,
        me: BotIdentity,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Result<Arc<Self>> {
        let router = Arc::new(Router::new());
        let cleanup = Cleanup::new(&platform);
        let scope = Scope::Chat(chat);

        let core = core_handlers(&platform, &db, &me, &cleanup);
        router.add_all(CORE, scope, &core);

        let quarantine = Quarantine::new(chat, platform.clone(), db.clone(), me.clone(), classifier);
        let roulette = Roulette::new(chat, platform.clone(), db);

        router.add_all(
            CORE,
            Scope::Private,
            &[
                (0, help(&platform, &me)),
                (0, roulette.private_hussars(&me.username)),
            ],
        );

        let modes = ModeController::new(router.clone(), platform.clone(), me.clone());
        modes.register(ModeSpec {
            name: "quarantine",
            default_on: true,
            pin: true,
            handlers: quarantine.handlers(),
            hooks: Some(Arc::new(QuarantineHooks(quarantine.clone()))),
        });
        modes.register(ModeSpec {
            name: "roulette",
            default_on: true,
            pin: false,
            handlers: roulette.handlers(&me.username, &cleanup),
            hooks: None,
        });
        router.add(COMMANDS_GROUP, "modes", scope, modes.commands_handler());
        modes.init_chat(chat).await?;

        log::info!("Moderating chat {chat} as @{}", me.username);
        Ok(Arc::new(Self {
            chat,
            platform,
            router,
            modes,
            quarantine,
        }))
    }

    pub async fn on_message(&self, message: ChatMessage) -> Result<()> {
        if message.chat_id != self.chat && !message.private {
            log::debug!("Ignoring message from unmanaged chat {}", message.chat_id);
            return Ok(());
        }
        self.router.dispatch(&message).await
    }

    pub async fn on_callback(&self, query: CallbackQuery) -> Result<()> {
        if self.quarantine.on_button(&query).await? {
            return Ok(());
        }
        log::debug!("Unknown callback payload {:?} from {}", query.data, query.from.id);
        self.platform.answer_callback(&query.id, "", false).await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn is_mode_on(&self, name: &str) -> bool {
        self.modes.is_on(self.chat, name).await
    }
}

fn help(platform: &Arc<dyn Platform>, me: &BotIdentity) -> Arc<dyn Handler> {
    let platform = platform.clone();
    on_command(&me.username, |c| matches!(c, Command::Help), move |message, _| {
        let platform = platform.clone();
        async move {
            let text = OutgoingMessage::plain(commands::help_text());
            Ok(router::reply(&*platform, &message, text).await)
        }
    })
    .boxed()
}

fn core_handlers(
    platform: &Arc<dyn Platform>,
    db: &Database,
    me: &BotIdentity,
    cleanup: &Cleanup,
) -> Vec<(i32, Arc<dyn Handler>)> {
    let username = &me.username;
    let trust_db = db.clone();
    let trust_platform = platform.clone();
    let untrust_db = db.clone();
    let untrust_platform = platform.clone();
    let mute_platform = platform.clone();
    let banme_platform = platform.clone();

    vec![
        (0, help(platform, me)),
        (
            0,
            on_command(username, |c| matches!(c, Command::Trust), move |message, _| {
                trust(trust_platform.clone(), trust_db.clone(), message)
            })
            .admin_only(platform)
            .cleanup(cleanup, TRUST_CLEANUP)
            .boxed(),
        ),
        (
            0,
            on_command(username, |c| matches!(c, Command::Untrust), move |message, _| {
                untrust(untrust_platform.clone(), untrust_db.clone(), message)
            })
            .admin_only(platform)
            .cleanup(cleanup, TRUST_CLEANUP)
            .boxed(),
        ),
        (
            0,
            on_command(username, |c| matches!(c, Command::Mute(_)), move |message, command| {
                let args = match command {
                    Command::Mute(args) => args,
                    _ => String::new(),
                };
                mute::mute(mute_platform.clone(), message, args)
            })
            .admin_only(platform)
            .boxed(),
        ),
        (
            0,
            on_command(username, |c| matches!(c, Command::Banme), move |message, _| {
                mute::banme(banme_platform.clone(), message)
            })
            .boxed(),
        ),
    ]
}

/// `/trust` as a reply: the replied user skips quarantine from now on.
async fn trust(platform: Arc<dyn Platform>, db: Database, message: ChatMessage) -> Result<Response> {
    let (Some(admin), Some(target)) = (
        message.sender_id(),
        message.reply_to.as_ref().and_then(|r| r.from.clone()),
    ) else {
        return Ok(router::reply(&*platform, &message, OutgoingMessage::markdown(messages::reply_required())).await);
    };

    db.trust(target.id, admin).await?;
    log::info!("{admin} trusted {}", target.id);
    Ok(router::reply(&*platform, &message, OutgoingMessage::markdown(messages::trusted(&target))).await)
}

async fn untrust(platform: Arc<dyn Platform>, db: Database, message: ChatMessage) -> Result<Response> {
    let Some(target) = message.reply_to.as_ref().and_then(|r| r.from.clone()) else {
        return Ok(router::reply(&*platform, &message, OutgoingMessage::markdown(messages::reply_required())).await);
    };

    let removed = db.untrust(target.id).await?;
    log::info!("{} untrusted (was trusted: {removed})", target.id);
    Ok(router::reply(
        &*platform,
        &message,
        OutgoingMessage::markdown(messages::untrusted(&target, removed)),
    )
    .await)
}

#[cfg(test)]
mod tests {
    use teloxide::types::{MessageId, UserId};

    use super::*;
    use crate::platform::MemberStatus;
    use crate::testing::{self, Call, MockPlatform, CHAT};

    const ADMIN: u64 = 1;

    async fn setup() -> (Arc<MockPlatform>, Database, Arc<App>) {
        let mock = MockPlatform::new();
        mock.set_status(UserId(ADMIN), MemberStatus::Administrator);
        let db = Database::in_memory().await.unwrap();
        let app = App::new(CHAT, mock.clone(), db.clone(), testing::bot_identity(), None)
            .await
            .unwrap();
        (mock, db, app)
    }

    fn trust_command(id: i32, from: u64, text: &str) -> ChatMessage {
        testing::reply(
            id,
            testing::person(from),
            text,
            testing::message(5, testing::person(100), "hello"),
        )
    }

    #[tokio::test]
    async fn trust_and_untrust() {
        let (mock, db, app) = setup().await;

        app.on_message(trust_command(10, ADMIN, "/trust")).await.unwrap();
        let trusted = db.get_trusted(UserId(100)).await.unwrap().unwrap();
        assert_eq!(trusted.trusted_by, UserId(ADMIN));

        app.on_message(trust_command(11, ADMIN, "/trust")).await.unwrap();
        assert!(db.is_trusted(UserId(100)).await.unwrap());
        assert_eq!(mock.sent().len(), 2);
        assert!(mock.once_delays().iter().all(|d| *d == TRUST_CLEANUP));

        app.on_message(trust_command(12, ADMIN, "/untrust")).await.unwrap();
        assert!(!db.is_trusted(UserId(100)).await.unwrap());

        mock.run_once_jobs().await;
        assert!(mock.deleted().contains(&MessageId(10)));
        assert!(!mock.deleted().contains(&MessageId(5)));
    }

    #[tokio::test]
    async fn members_cannot_trust() {
        let (mock, db, app) = setup().await;
        app.on_message(trust_command(10, 7, "/trust")).await.unwrap();
        assert!(!db.is_trusted(UserId(100)).await.unwrap());
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn default_modes_are_on() {
        let (mock, _db, app) = setup().await;
        assert!(app.is_mode_on("quarantine").await);
        assert!(app.is_mode_on("roulette").await);
        assert!(mock.sent().is_empty());
        assert_eq!(mock.repeating.lock().unwrap().len(), 1);

        app.on_message(testing::join(10, vec![testing::person(100)]))
            .await
            .unwrap();
        assert_eq!(mock.sent().len(), 1);
    }

    #[tokio::test]
    async fn quarantine_off_releases_everyone() {
        let (mock, db, app) = setup().await;
        app.on_message(testing::join(10, vec![testing::person(100)]))
            .await
            .unwrap();
        assert!(db.is_in_quarantine(UserId(100)).await.unwrap());

        app.on_message(testing::message(11, testing::person(ADMIN), "/quarantine_off"))
            .await
            .unwrap();
        assert!(!app.is_mode_on("quarantine").await);
        assert!(!db.is_in_quarantine(UserId(100)).await.unwrap());
        assert!(mock.repeating.lock().unwrap()[0].handle.is_cancelled());
        assert!(mock.sent_texts().contains(&"quarantine is OFF".to_string()));

        mock.clear();
        app.on_message(testing::join(12, vec![testing::person(101)]))
            .await
            .unwrap();
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn quarantined_users_cannot_roll() {
        let (mock, db, app) = setup().await;
        app.on_message(testing::join(10, vec![testing::person(100)]))
            .await
            .unwrap();
        mock.clear();

        app.on_message(testing::message(11, testing::person(100), "/roll"))
            .await
            .unwrap();
        assert_eq!(mock.deleted(), vec![MessageId(11)]);
        assert!(db.get_hussar(UserId(100)).await.unwrap().is_none());

        app.on_message(testing::message(12, testing::person(7), "/roll"))
            .await
            .unwrap();
        assert!(db.get_hussar(UserId(7)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn other_chats_are_ignored() {
        let (mock, _db, app) = setup().await;
        let mut message = testing::message(10, testing::person(7), "/roll");
        message.chat_id = ChatId(-5);
        app.on_message(message).await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn private_leaderboard_is_public() {
        let (mock, db, app) = setup().await;
        db.add_hussar(&testing::person(7)).await.unwrap();

        let mut message = testing::message(10, testing::person(7), "/hussars");
        message.chat_id = ChatId(7);
        message.private = true;
        app.on_message(message).await.unwrap();
        assert!(matches!(mock.calls()[..], [Call::Photo { chat: ChatId(7), .. }]));

        mock.clear();
        app.on_message(testing::message(11, testing::person(7), "/hussars"))
            .await
            .unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_callbacks_are_acknowledged() {
        let (mock, _db, app) = setup().await;
        app.on_callback(CallbackQuery {
            id: "q".into(),
            from: testing::person(1),
            data: Some("other".into()),
        })
        .await
        .unwrap();
        assert!(matches!(
            &mock.calls()[..],
            [Call::Callback { alert: false, .. }]
        ));
    }
}
