use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use teloxide::types::{ChatId, UserId};

use crate::error::Result;
use crate::messages;
use crate::platform::{Capabilities, ChatMessage, OutgoingMessage, Platform, PlatformError};
use crate::roulette::MUTE_MINUTES_BASE;
use crate::router::{self, Response};

/// Telegram treats anything longer as a permanent restriction.
pub const MAX_RESTRICTION_DAYS: i64 = 366;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"(?i)^(\d+)([wdhms]?)$").unwrap();
}

/// Sums tokens like `1w 2d 3h 4m 5s`. A bare number counts as minutes,
/// anything unparseable as nothing.
pub fn get_duration(text: &str) -> Duration {
    text.split_whitespace()
        .filter_map(|token| {
            let captures = TOKEN.captures(token)?;
            let amount: i64 = captures[1].parse().ok()?;
            match captures[2].to_ascii_lowercase().as_str() {
                "w" => Duration::try_weeks(amount),
                "d" => Duration::try_days(amount),
                "h" => Duration::try_hours(amount),
                "s" => Duration::try_seconds(amount),
                _ => Duration::try_minutes(amount),
            }
        })
        .fold(Duration::zero(), |acc, d| acc.checked_add(&d).unwrap_or(acc))
}

/// Takes every speaking right away from `user` for `duration`.
pub async fn mute_for(
    platform: &dyn Platform,
    chat: ChatId,
    user: UserId,
    duration: Duration,
) -> Result<DateTime<Utc>, PlatformError> {
    let now = Utc::now();
    let until = now
        .checked_add_signed(duration.min(Duration::days(MAX_RESTRICTION_DAYS)))
        .unwrap_or(now);
    platform
        .restrict_member(chat, user, until, Capabilities::NONE)
        .await?;
    log::info!("Muted {user} in {chat} until {until}");
    Ok(until)
}

pub async fn unmute(platform: &dyn Platform, chat: ChatId, user: UserId) -> Result<(), PlatformError> {
    platform
        .restrict_member(chat, user, Utc::now(), Capabilities::ALL)
        .await?;
    log::info!("Unmuted {user} in {chat}");
    Ok(())
}

/// `/mute <duration>` sent as a reply. A zero duration lifts the restriction.
pub async fn mute(platform: Arc<dyn Platform>, message: ChatMessage, args: String) -> Result<Response> {
    let Some(target) = message.reply_to.as_ref().and_then(|r| r.from.clone()) else {
        return Ok(router::reply(&*platform, &message, OutgoingMessage::markdown(messages::reply_required())).await);
    };

    let duration = get_duration(&args);
    let outcome = if duration.is_zero() {
        unmute(&*platform, message.chat_id, target.id)
            .await
            .map(|_| messages::unmuted(&target))
    } else {
        mute_for(&*platform, message.chat_id, target.id, duration)
            .await
            .map(|until| messages::muted(&target, until))
    };

    let text = match outcome {
        Ok(text) => text,
        Err(PlatformError::Permission(e)) => {
            log::warn!("Can't restrict {} in {}: {e}", target.id, message.chat_id);
            messages::restrict_failed()
        }
        Err(e) => return Err(e.into()),
    };
    Ok(router::reply(&*platform, &message, OutgoingMessage::markdown(text)).await)
}

/// `/banme`: a random 1 to 7 multiple of the roulette base mute.
pub async fn banme(platform: Arc<dyn Platform>, message: ChatMessage) -> Result<Response> {
    let Some(person) = message.from.clone() else {
        return Ok(Response::Done);
    };

    let minutes = MUTE_MINUTES_BASE * rand::thread_rng().gen_range(1..=7);
    let text = match mute_for(&*platform, message.chat_id, person.id, Duration::minutes(minutes)).await {
        Ok(_) => messages::banme(&person, minutes),
        Err(PlatformError::Permission(e)) => {
            log::warn!("Can't restrict {} in {}: {e}", person.id, message.chat_id);
            messages::restrict_failed()
        }
        Err(e) => return Err(e.into()),
    };
    Ok(router::reply(&*platform, &message, OutgoingMessage::markdown(text)).await)
}
