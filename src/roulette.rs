mod barrel;
mod leaderboard;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use teloxide::types::ChatId;

use barrel::{Barrel, Shot, NUM_BULLETS};

use crate::cleanup::Cleanup;
use crate::commands::Command;
use crate::database::Database;
use crate::error::Result;
use crate::messages;
use crate::mute;
use crate::platform::{ChatMessage, MemberStatus, OutgoingMessage, Platform, PlatformError};
use crate::router::{self, on_command, Handler, HandlerExt, Response};

/// Mute for the first chamber, in minutes. Later chambers multiply it.
pub const MUTE_MINUTES_BASE: i64 = 16 * 60;

/// Leaderboards longer than this go out as a document instead of a photo.
const MAX_PHOTO_ROWS: usize = 25;

pub const GROUP: i32 = 10;

const ROLL_CLEANUP: Duration = Duration::from_secs(2 * 60);
const LEADERBOARD_CLEANUP: Duration = Duration::from_secs(10 * 60);
const HTOP_CLEANUP: Duration = Duration::from_secs(60);
const SHORT_CLEANUP: Duration = Duration::from_secs(10);

lazy_static! {
    static ref TRIGGER: Regex = Regex::new(r"(?i)^/?(roll|ролл|рулетка|bang|пиф)\b").unwrap();
}

pub fn is_trigger(message: &ChatMessage) -> bool {
    message.is_dice || TRIGGER.is_match(message.text())
}

pub struct Roulette {
    chat: ChatId,
    platform: Arc<dyn Platform>,
    db: Database,
    barrels: Mutex<HashMap<ChatId, Arc<Mutex<Barrel>>>>,
}

impl Roulette {
    pub fn new(chat: ChatId, platform: Arc<dyn Platform>, db: Database) -> Arc<Self> {
        Arc::new(Self {
            chat,
            platform,
            db,
            barrels: Default::default(),
        })
    }

    fn barrel(&self, chat: ChatId) -> Arc<Mutex<Barrel>> {
        let mut barrels = self.barrels.lock().unwrap_or_else(|e| e.into_inner());
        barrels
            .entry(chat)
            .or_insert_with(|| Arc::new(Mutex::new(Barrel::load(&mut rand::thread_rng()))))
            .clone()
    }

    fn shot(&self, chat: ChatId) -> Shot {
        let barrel = self.barrel(chat);
        let mut barrel = barrel.lock().unwrap_or_else(|e| e.into_inner());
        barrel.shot(&mut rand::thread_rng())
    }

    pub async fn roll(&self, message: &ChatMessage) -> Result<Response> {
        let Some(person) = message.from.clone().filter(|p| !p.is_bot) else {
            return Ok(Response::Done);
        };
        self.db.add_hussar(&person).await?;

        let shot = self.shot(message.chat_id);
        let text = if shot.hit {
            let mute_min = MUTE_MINUTES_BASE * (NUM_BULLETS - shot.shots_remained) as i64;
            let muted = mute::mute_for(
                &*self.platform,
                message.chat_id,
                person.id,
                chrono::Duration::minutes(mute_min),
            )
            .await;
            match muted {
                Ok(_) => {
                    self.db.hussar_dead(person.id, mute_min).await?;
                    log::info!("{} hit the bullet, {mute_min} min in the club", person.id);
                    messages::roulette_hit(&person, mute_min)
                }
                Err(e) => {
                    // the death counts, the club time doesn't
                    self.db.hussar_dead(person.id, 0).await?;
                    if !matches!(e, PlatformError::Permission(_)) {
                        return Err(e.into());
                    }
                    log::warn!("Couldn't mute hussar {}: {e}", person.id);
                    messages::restrict_failed()
                }
            }
        } else {
            self.db.hussar_miss(person.id).await?;
            let left = match shot.shots_remained {
                0 => NUM_BULLETS,
                n => n,
            };
            let next_mute = MUTE_MINUTES_BASE * (NUM_BULLETS - (left - 1)) as i64;
            messages::roulette_miss(&person, NUM_BULLETS - left, left, next_mute)
        };

        Ok(router::reply(&*self.platform, message, OutgoingMessage::markdown(text)).await)
    }

    pub async fn hussars(&self, message: &ChatMessage) -> Result<Response> {
        let records = self.db.get_all_hussars().await?;
        if records.is_empty() {
            return Ok(router::reply(
                &*self.platform,
                message,
                OutgoingMessage::markdown(messages::no_hussars()),
            )
            .await);
        }

        let png = match leaderboard::render_png(&leaderboard::format_table(&records)) {
            Ok(png) => png,
            Err(e) => {
                log::error!("Couldn't render the leaderboard: {e}");
                return Ok(Response::Done);
            }
        };
        let sent = if records.len() <= MAX_PHOTO_ROWS {
            self.platform
                .send_photo(message.chat_id, png, "hussars.png")
                .await
        } else {
            self.platform
                .send_document(message.chat_id, png, "hussars.png")
                .await
        };

        match sent {
            Ok(id) => Ok(Response::Replied(id)),
            Err(e) => {
                log::warn!("Couldn't send the leaderboard to {}: {e}", message.chat_id);
                Ok(Response::Done)
            }
        }
    }

    /// Hussars currently restricted in the managed chat.
    pub async fn htop(&self, message: &ChatMessage) -> Result<Response> {
        let mut names = Vec::new();
        for record in self.db.get_all_hussars().await? {
            match self.platform.get_member_status(self.chat, record.user_id).await {
                Ok(MemberStatus::Restricted) => names.push(record.meta.handle()),
                Ok(_) => {}
                Err(e) => log::warn!("Couldn't get status of {}: {e}", record.user_id),
            }
        }
        Ok(router::reply(&*self.platform, message, OutgoingMessage::markdown(messages::htop(&names))).await)
    }

    pub async fn gdpr_me(&self, message: &ChatMessage) -> Result<Response> {
        let Some(user) = message.sender_id() else {
            return Ok(Response::Done);
        };
        self.db.remove_hussar(user).await?;
        Ok(router::reply(&*self.platform, message, OutgoingMessage::markdown(messages::gdpr_done())).await)
    }

    pub async fn wipe(&self, message: &ChatMessage) -> Result<Response> {
        let count = self.db.remove_all_hussars().await?;
        log::info!("Wiped {count} hussars");
        Ok(router::reply(
            &*self.platform,
            message,
            OutgoingMessage::markdown(messages::hussars_wiped(count)),
        )
        .await)
    }

    /// Everything the `roulette` mode attaches to the managed chat.
    pub fn handlers(self: &Arc<Self>, me: &str, cleanup: &Cleanup) -> Vec<(i32, Arc<dyn Handler>)> {
        let platform = &self.platform;
        vec![
            (
                GROUP,
                Trigger(self.clone()).cleanup(cleanup, ROLL_CLEANUP).boxed(),
            ),
            (
                GROUP,
                self.command(me, |c| matches!(c, Command::Hussars), |r, m| async move {
                    r.hussars(&m).await
                })
                .admin_only(platform)
                .cleanup(cleanup, LEADERBOARD_CLEANUP)
                .boxed(),
            ),
            (
                GROUP,
                self.command(me, |c| matches!(c, Command::Htop), |r, m| async move {
                    r.htop(&m).await
                })
                .admin_only(platform)
                .cleanup(cleanup, HTOP_CLEANUP)
                .boxed(),
            ),
            (
                GROUP,
                self.command(me, |c| matches!(c, Command::GdprMe), |r, m| async move {
                    r.gdpr_me(&m).await
                })
                .cleanup(cleanup, SHORT_CLEANUP)
                .boxed(),
            ),
            (
                GROUP,
                self.command(me, |c| matches!(c, Command::WipeHussars), |r, m| async move {
                    r.wipe(&m).await
                })
                .admin_only(platform)
                .cleanup(cleanup, SHORT_CLEANUP)
                .boxed(),
            ),
        ]
    }

    /// The public leaderboard for private chats.
    pub fn private_hussars(self: &Arc<Self>, me: &str) -> Arc<dyn Handler> {
        self.command(me, |c| matches!(c, Command::Hussars), |r, m| async move {
            r.hussars(&m).await
        })
        .boxed()
    }

    fn command<F, Fut>(
        self: &Arc<Self>,
        me: &str,
        matches: fn(&Command) -> bool,
        action: F,
    ) -> impl Handler
    where
        F: Fn(Arc<Self>, ChatMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Response>> + Send + 'static,
    {
        let roulette = self.clone();
        on_command(me, matches, move |message, _| action(roulette.clone(), message))
    }
}

struct Trigger(Arc<Roulette>);

#[async_trait]
impl Handler for Trigger {
    fn check(&self, message: &ChatMessage) -> bool {
        is_trigger(message)
    }

    async fn handle(&self, message: &ChatMessage) -> Result<Response> {
        self.0.roll(message).await
    }
}
