use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::{ChatId, MessageId};

use crate::cleanup::Cleanup;
use crate::commands::{self, Command};
use crate::error::Result;
use crate::platform::{self, ChatMessage, OutgoingMessage, Platform};

/// What a handler did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Handled, nothing was sent.
    Done,
    /// Handled, the bot answered with this message.
    Replied(MessageId),
    /// Handled, and no later group may see the message.
    Consumed,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn check(&self, message: &ChatMessage) -> bool;

    async fn handle(&self, message: &ChatMessage) -> Result<Response>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Chat(ChatId),
    Private,
}

impl Scope {
    fn matches(&self, message: &ChatMessage) -> bool {
        match self {
            Scope::Chat(chat) => *chat == message.chat_id,
            Scope::Private => message.private,
        }
    }
}

struct Registration {
    owner: &'static str,
    scope: Scope,
    handler: Arc<dyn Handler>,
}

/// Handler groups, visited in ascending order. Within a group the first
/// handler that accepts a message handles it.
#[derive(Default)]
pub struct Router {
    groups: RwLock<BTreeMap<i32, Vec<Registration>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, group: i32, owner: &'static str, scope: Scope, handler: Arc<dyn Handler>) {
        self.add_all(owner, scope, &[(group, handler)]);
    }

    /// Registers a whole handler set under one lock.
    pub fn add_all(&self, owner: &'static str, scope: Scope, handlers: &[(i32, Arc<dyn Handler>)]) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        for (group, handler) in handlers {
            groups.entry(*group).or_default().push(Registration {
                owner,
                scope,
                handler: handler.clone(),
            });
        }
    }

    /// Detaches every handler `owner` registered for `scope`.
    pub fn remove_owner(&self, owner: &'static str, scope: Scope) -> usize {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for registrations in groups.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| !(r.owner == owner && r.scope == scope));
            removed += before - registrations.len();
        }
        groups.retain(|_, registrations| !registrations.is_empty());
        removed
    }

    #[cfg(test)]
    pub fn count(&self, owner: &'static str, scope: Scope) -> usize {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups
            .values()
            .flatten()
            .filter(|r| r.owner == owner && r.scope == scope)
            .count()
    }

    fn snapshot(&self, message: &ChatMessage) -> Vec<Vec<Arc<dyn Handler>>> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups
            .values()
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| r.scope.matches(message))
                    .map(|r| r.handler.clone())
                    .collect()
            })
            .collect()
    }

    pub async fn dispatch(&self, message: &ChatMessage) -> Result<()> {
        for group in self.snapshot(message) {
            let Some(handler) = group.iter().find(|h| h.check(message)) else {
                continue;
            };
            if handler.handle(message).await? == Response::Consumed {
                break;
            }
        }
        Ok(())
    }
}

/// Sends `reply`, logging instead of failing when the platform refuses.
pub async fn reply(platform: &dyn Platform, to: &ChatMessage, reply: OutgoingMessage) -> Response {
    match platform
        .send_message(to.chat_id, reply.reply_to(to.id))
        .await
    {
        Ok(id) => Response::Replied(id),
        Err(e) => {
            log::warn!("Couldn't reply in {}: {e}", to.chat_id);
            Response::Done
        }
    }
}

/// Runs `action` for messages carrying a matching bot command.
pub struct OnCommand<F> {
    bot_username: String,
    matches: fn(&Command) -> bool,
    action: F,
}

pub fn on_command<F, Fut>(bot_username: &str, matches: fn(&Command) -> bool, action: F) -> OnCommand<F>
where
    F: Fn(ChatMessage, Command) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    OnCommand {
        bot_username: bot_username.to_string(),
        matches,
        action,
    }
}

#[async_trait]
impl<F, Fut> Handler for OnCommand<F>
where
    F: Fn(ChatMessage, Command) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn check(&self, message: &ChatMessage) -> bool {
        commands::parse(message, &self.bot_username).is_some_and(|c| (self.matches)(&c))
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        let Some(command) = commands::parse(message, &self.bot_username) else {
            return Ok(Response::Done);
        };
        (self.action)(message.clone(), command).await
    }
}

/// Silently drops invocations by non-admins.
pub struct AdminOnly<H> {
    platform: Arc<dyn Platform>,
    inner: H,
}

#[async_trait]
impl<H: Handler> Handler for AdminOnly<H> {
    fn check(&self, message: &ChatMessage) -> bool {
        self.inner.check(message)
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        if !platform::is_admin(&*self.platform, message).await {
            log::debug!(
                "Dropping admin-only message {} from {:?}",
                message.id.0,
                message.sender_id()
            );
            return Ok(Response::Done);
        }
        self.inner.handle(message).await
    }
}

/// Schedules removal of the handler's answer, and optionally of the command.
pub struct CleanupAfter<H> {
    cleanup: Cleanup,
    delay: Duration,
    remove_cmd: bool,
    remove_reply: bool,
    inner: H,
}

impl<H> CleanupAfter<H> {
    pub fn keep_command(mut self) -> Self {
        self.remove_cmd = false;
        self
    }

    pub fn with_replied(mut self) -> Self {
        self.remove_reply = true;
        self
    }
}

#[async_trait]
impl<H: Handler> Handler for CleanupAfter<H> {
    fn check(&self, message: &ChatMessage) -> bool {
        self.inner.check(message)
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        let response = self.inner.handle(message).await?;
        if let Response::Replied(id) = response {
            self.cleanup
                .schedule_reply(message, id, self.delay, self.remove_cmd, self.remove_reply);
        }
        Ok(response)
    }
}

pub trait HandlerExt: Handler + Sized {
    fn admin_only(self, platform: &Arc<dyn Platform>) -> AdminOnly<Self> {
        AdminOnly {
            platform: platform.clone(),
            inner: self,
        }
    }

    fn cleanup(self, cleanup: &Cleanup, delay: Duration) -> CleanupAfter<Self> {
        CleanupAfter {
            cleanup: cleanup.clone(),
            delay,
            remove_cmd: true,
            remove_reply: false,
            inner: self,
        }
    }

    fn boxed(self) -> Arc<dyn Handler>
    where
        Self: 'static,
    {
        Arc::new(self)
    }
}

impl<H: Handler> HandlerExt for H {}
