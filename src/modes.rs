use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use teloxide::types::{ChatId, MessageId};

use crate::commands;
use crate::error::{Error, Result};
use crate::messages;
use crate::platform::{self, BotIdentity, ChatMessage, OutgoingMessage, Platform};
use crate::router::{self, Handler, Response, Router, Scope};

/// Mode commands run before anything a mode attaches.
pub const COMMANDS_GROUP: i32 = -100;

/// Side effects of switching a mode, beyond attaching its handlers.
#[async_trait]
pub trait ModeHooks: Send + Sync {
    async fn on_enable(&self, _chat: ChatId) -> Result<()> {
        Ok(())
    }

    async fn on_disable(&self, _chat: ChatId) -> Result<()> {
        Ok(())
    }
}

pub struct ModeSpec {
    pub name: &'static str,
    pub default_on: bool,
    /// Pin the `ON` announcement until the mode goes off again.
    pub pin: bool,
    pub handlers: Vec<(i32, Arc<dyn Handler>)>,
    pub hooks: Option<Arc<dyn ModeHooks>>,
}

#[derive(Debug, Default)]
struct ChatState {
    on: bool,
    initialized: bool,
    pinned: Option<MessageId>,
}

struct Mode {
    spec: ModeSpec,
    chats: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<ChatState>>>>,
}

impl Mode {
    fn state(&self, chat: ChatId) -> Arc<tokio::sync::Mutex<ChatState>> {
        let mut chats = self.chats.lock().unwrap_or_else(|e| e.into_inner());
        chats.entry(chat).or_default().clone()
    }
}

/// Per-chat feature flags, each owning a set of handlers in the [`Router`].
pub struct ModeController {
    modes: RwLock<HashMap<&'static str, Arc<Mode>>>,
    router: Arc<Router>,
    platform: Arc<dyn Platform>,
    me: BotIdentity,
}

impl ModeController {
    pub fn new(router: Arc<Router>, platform: Arc<dyn Platform>, me: BotIdentity) -> Arc<Self> {
        Arc::new(Self {
            modes: Default::default(),
            router,
            platform,
            me,
        })
    }

    pub fn register(&self, spec: ModeSpec) {
        let mut modes = self.modes.write().unwrap_or_else(|e| e.into_inner());
        log::debug!("Registered mode {} (default {})", spec.name, spec.default_on);
        modes.insert(
            spec.name,
            Arc::new(Mode {
                spec,
                chats: Default::default(),
            }),
        );
    }

    fn mode(&self, name: &str) -> Option<Arc<Mode>> {
        let modes = self.modes.read().unwrap_or_else(|e| e.into_inner());
        modes.get(name).cloned()
    }

    fn names(&self) -> Vec<&'static str> {
        let modes = self.modes.read().unwrap_or_else(|e| e.into_inner());
        modes.keys().copied().collect()
    }

    /// Attaches the default-on modes of `chat` without announcing them.
    pub async fn init_chat(&self, chat: ChatId) -> Result<()> {
        for name in self.names() {
            if let Some(mode) = self.mode(name) {
                let state = mode.state(chat);
                let mut state = state.lock().await;
                self.initialize(&mode, chat, &mut state).await?;
            }
        }
        Ok(())
    }

    async fn initialize(&self, mode: &Mode, chat: ChatId, state: &mut ChatState) -> Result<()> {
        if state.initialized {
            return Ok(());
        }
        state.initialized = true;
        if !mode.spec.default_on {
            return Ok(());
        }

        state.on = true;
        self.router
            .add_all(mode.spec.name, Scope::Chat(chat), &mode.spec.handlers);
        log::info!("Mode {} is on by default in {chat}", mode.spec.name);
        if let Some(hooks) = &mode.spec.hooks {
            hooks.on_enable(chat).await.map_err(|e| callback_error(mode, e))?;
        }
        Ok(())
    }

    pub async fn is_on(&self, chat: ChatId, name: &str) -> bool {
        match self.mode(name) {
            Some(mode) => {
                let state = mode.state(chat);
                let state = state.lock().await;
                state.on || (!state.initialized && mode.spec.default_on)
            }
            None => false,
        }
    }

    /// Switches `name` in `chat`. Returns whether anything changed; repeating
    /// the current state is a no-op.
    pub async fn set(&self, chat: ChatId, name: &str, on: bool) -> Result<bool> {
        let Some(mode) = self.mode(name) else {
            return Ok(false);
        };
        let state = mode.state(chat);
        let mut state = state.lock().await;
        self.initialize(&mode, chat, &mut state).await?;

        if state.on == on {
            return Ok(false);
        }
        state.on = on;
        log::info!("Mode {name} turned {} in {chat}", if on { "on" } else { "off" });

        let spec = &mode.spec;
        if on {
            self.router.add_all(spec.name, Scope::Chat(chat), &spec.handlers);
        } else {
            self.router.remove_owner(spec.name, Scope::Chat(chat));
        }

        let announcement = self
            .platform
            .send_message(
                chat,
                OutgoingMessage::plain(messages::mode_status(name, on)).silent(),
            )
            .await;
        match announcement {
            Ok(id) if on && spec.pin => {
                match self.platform.pin_message(chat, id, true).await {
                    Ok(()) => state.pinned = Some(id),
                    Err(e) => log::warn!("Couldn't pin announcement of {name}: {e}"),
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Couldn't announce mode {name} in {chat}: {e}"),
        }
        if !on {
            if let Some(pinned) = state.pinned.take() {
                if let Err(e) = self.platform.unpin_message(chat, Some(pinned)).await {
                    log::warn!("Couldn't unpin announcement of {name}: {e}");
                }
            }
        }

        if let Some(hooks) = &spec.hooks {
            let result = if on {
                hooks.on_enable(chat).await
            } else {
                hooks.on_disable(chat).await
            };
            result.map_err(|e| callback_error(&mode, e))?;
        }
        Ok(true)
    }

    /// `/<mode>_on`, `/<mode>_off` (admins) and `/<mode>` (anyone).
    pub fn commands_handler(self: &Arc<Self>) -> Arc<dyn Handler> {
        Arc::new(ModeCommands {
            controller: Arc::downgrade(self),
            bot_username: self.me.username.clone(),
        })
    }
}

fn callback_error(mode: &Mode, e: Error) -> Error {
    log::error!("Callback of mode {} failed: {e}", mode.spec.name);
    Error::ModeCallback {
        mode: mode.spec.name,
        source: Box::new(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    On,
    Off,
    Status,
}

struct ModeCommands {
    controller: Weak<ModeController>,
    bot_username: String,
}

impl ModeCommands {
    fn parse(&self, controller: &ModeController, message: &ChatMessage) -> Option<(&'static str, Action)> {
        let (command, _) = commands::split(message.text(), &self.bot_username)?;
        let (name, action) = if let Some(name) = command.strip_suffix("_on") {
            (name, Action::On)
        } else if let Some(name) = command.strip_suffix("_off") {
            (name, Action::Off)
        } else {
            (command, Action::Status)
        };

        match (controller.mode(name), controller.mode(command)) {
            (Some(mode), _) => Some((mode.spec.name, action)),
            // a mode whose own name ends in `_on`
            (None, Some(mode)) => Some((mode.spec.name, Action::Status)),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl Handler for ModeCommands {
    fn check(&self, message: &ChatMessage) -> bool {
        self.controller
            .upgrade()
            .is_some_and(|c| self.parse(&c, message).is_some())
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        let Some(controller) = self.controller.upgrade() else {
            return Ok(Response::Done);
        };
        let Some((name, action)) = self.parse(&controller, message) else {
            return Ok(Response::Done);
        };

        match action {
            Action::Status => {
                let on = controller.is_on(message.chat_id, name).await;
                Ok(router::reply(
                    &*controller.platform,
                    message,
                    OutgoingMessage::plain(messages::mode_status(name, on)),
                )
                .await)
            }
            Action::On | Action::Off => {
                if !platform::is_admin(&*controller.platform, message).await {
                    log::debug!("Ignoring {name} toggle from {:?}", message.sender_id());
                    return Ok(Response::Done);
                }
                controller
                    .set(message.chat_id, name, action == Action::On)
                    .await?;
                Ok(Response::Done)
            }
        }
    }
}
