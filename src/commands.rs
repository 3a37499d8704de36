use teloxide::macros::BotCommands;
use teloxide::utils::command::{BotCommands as _, ParseError};

use crate::platform::ChatMessage;

fn rest(s: String) -> Result<(String,), ParseError> {
    Ok((s.trim().to_string(),))
}

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case", description = "Команды модерации:")]
pub enum Command {
    #[command(description = "показать этот текст.")]
    Help,
    #[command(description = "(админ, ответом) пускать без карантина.")]
    Trust,
    #[command(description = "(админ, ответом) отозвать доверие.")]
    Untrust,
    #[command(description = "(админ, ответом) помолчать, например 2h 30m.", parse_with = rest)]
    Mute(String),
    #[command(description = "замьютить себя на случайный срок.")]
    Banme,
    #[command(description = "таблица гусаров.")]
    Hussars,
    #[command(description = "(админ) гусары, которые сейчас молчат.")]
    Htop,
    #[command(description = "забыть мою статистику рулетки.")]
    GdprMe,
    #[command(description = "(админ) стереть всех гусаров.")]
    WipeHussars,
    #[command(description = "(админ, ответом) приветствие участника.")]
    Hellomsg,
}

pub fn parse(message: &ChatMessage, bot_username: &str) -> Option<Command> {
    let text = message.text.as_deref()?;
    if !text.starts_with('/') {
        return None;
    }
    Command::parse(text, bot_username).ok()
}

pub fn help_text() -> String {
    Command::descriptions().to_string()
}

/// Splits `/name@bot args` into `(name, args)`. Commands for other bots yield `None`.
pub fn split<'a>(text: &'a str, bot_username: &str) -> Option<(&'a str, &'a str)> {
    let text = text.strip_prefix('/')?;
    let (head, args) = match text.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (text, ""),
    };

    let name = match head.split_once('@') {
        Some((name, bot)) if bot.eq_ignore_ascii_case(bot_username) => name,
        Some(_) => return None,
        None => head,
    };

    if name.is_empty() {
        return None;
    }
    Some((name, args))
}
