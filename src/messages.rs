use chrono::{DateTime, Utc};
use chrono_tz::Asia::Vladivostok;
use rand::seq::SliceRandom;
use teloxide::utils::markdown::{blockquote, bold, escape, user_mention};

use crate::database::HelloMessage;
use crate::platform::Person;

const BOT_PHRASES: &[&str] = &[
    "Я бот!",
    "I am a bot!",
    "Ich bin ein Bot!",
    "Je suis un bot !",
    "¡Soy un bot!",
    "Sono un bot!",
    "Jestem botem!",
    "Eu sou um robô!",
    "Ben bir botum!",
    "Я робот!",
    "我是机器人！",
    "私はボットです！",
    "Ik ben een bot!",
];

pub const BOT_BUTTON_ALERT: &str =
    "Ха, попался! Это кнопка для ботов. Людям нужно просто ответить на приветствие и рассказать о себе.";

pub const WELCOME: &str = "Добро пожаловать в VLDC!";

pub const SELF_INTRO: &str = "Всем привет! Я бот этого чата: встречаю новичков, \
    проверяю, что они не боты, и слежу за рулеткой. Не обращайте на меня внимания.";

pub fn random_bot_phrase() -> &'static str {
    BOT_PHRASES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("I am a bot!")
}

fn mention(person: &Person) -> String {
    user_mention(person.id, &escape(&person.full_name()))
}

pub fn greeting(person: &Person, minutes: i64) -> String {
    format!(
        "Привет, {}\\! {}",
        mention(person),
        escape(&format!(
            "Чтобы остаться в чате, ответь на это сообщение и расскажи немного о себе: \
            кто ты, откуда и чем занимаешься. У тебя есть {minutes} минут, \
            до этого твои сообщения будут исчезать."
        ))
    )
}

pub fn bio_too_short(person: &Person) -> String {
    format!(
        "{}, {}",
        mention(person),
        escape("твой ответ слишком короткий… Расскажи о себе чуть подробнее, ответом на приветствие.")
    )
}

pub fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Vladivostok)
        .format("%d.%m.%Y %H:%M")
        .to_string()
}

pub fn hello_info(hello: &HelloMessage) -> String {
    format!(
        "{}\n{}\n{}\n\n{}",
        bold(&escape(&hello.display_name)),
        escape(&format!("принят: {}", local_time(hello.accepted_at))),
        escape(&format!("хранится до: {}", local_time(hello.expires_at))),
        blockquote(&escape(&hello.text))
    )
}

pub fn no_hello() -> String {
    escape("Приветствия этого участника нет или оно уже истекло.")
}

pub fn reply_required() -> String {
    escape("Эту команду нужно отправить ответом на сообщение участника.")
}

pub fn mode_status(name: &str, on: bool) -> String {
    format!("{name} is {}", if on { "ON" } else { "OFF" })
}

/// `1d 8h`, `16h`, `45m`.
pub fn format_minutes(minutes: i64) -> String {
    let (days, hours, mins) = (minutes / (24 * 60), minutes / 60 % 24, minutes % 60);
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if mins > 0 || parts.is_empty() {
        parts.push(format!("{mins}m"));
    }
    parts.join(" ")
}

pub fn roulette_hit(person: &Person, mute_minutes: i64) -> String {
    format!(
        "💥 {} {}",
        mention(person),
        escape(&format!(
            "застрелился 😵 и отдыхает {} в клубе гусаров.",
            format_minutes(mute_minutes)
        ))
    )
}

/// `fired` chambers are spent, `left` still in the barrel.
pub fn roulette_miss(person: &Person, fired: usize, left: usize, next_mute_minutes: i64) -> String {
    let barrel = "⚫".repeat(fired) + &"⚪".repeat(left);
    format!(
        "{} {} {}",
        mention(person),
        escape(&format!("щёлк! 😅 {barrel}")),
        escape(&format!(
            "Следующему выстрелу грозит {}.",
            format_minutes(next_mute_minutes)
        ))
    )
}

pub fn no_hussars() -> String {
    escape("Гусаров пока нет. Никто не рискнул.")
}

pub fn htop(names: &[String]) -> String {
    if names.is_empty() {
        return escape("Сейчас никто не отдыхает.");
    }
    escape("Сейчас отдыхают:\n") + &escape(&names.join("\n"))
}

pub fn gdpr_done() -> String {
    escape("ok, boomer")
}

pub fn hussars_wiped(count: u64) -> String {
    escape(&format!("Клуб гусаров распущен ({count} записей)."))
}

pub fn trusted(person: &Person) -> String {
    format!("{} {}", mention(person), escape("теперь в доверенных 🤝"))
}

pub fn untrusted(person: &Person, removed: bool) -> String {
    if removed {
        format!("{} {}", mention(person), escape("больше не в доверенных."))
    } else {
        format!("{} {}", mention(person), escape("и так не был в доверенных."))
    }
}

pub fn muted(person: &Person, until: DateTime<Utc>) -> String {
    format!(
        "{} {}",
        mention(person),
        escape(&format!("помолчит до {}.", local_time(until)))
    )
}

pub fn unmuted(person: &Person) -> String {
    format!("{} {}", mention(person), escape("снова может говорить."))
}

pub fn banme(person: &Person, minutes: i64) -> String {
    format!(
        "{} {}",
        mention(person),
        escape(&format!("сам попросил. Отдыхай {}.", format_minutes(minutes)))
    )
}

pub fn restrict_failed() -> String {
    escape("Не получилось: у бота нет прав ограничивать этого участника.")
}
