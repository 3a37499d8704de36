use std::str::FromStr;

use teloxide::types::ChatId;
use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "bot.db";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    Missing(&'static str),
    #[error("environment variable {name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Where the managed chat lives, as given in `CHAT_ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Id(ChatId),
    Username(String),
}

impl FromStr for ChatTarget {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix('@') {
            if name.is_empty() {
                return Err(());
            }
            return Ok(ChatTarget::Username(s.to_string()));
        }
        s.parse::<i64>()
            .map(|id| ChatTarget::Id(ChatId(id)))
            .map_err(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub chat: ChatTarget,
    pub db_path: String,
    pub debug: bool,
    pub openai_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token = non_empty("TOKEN").ok_or(ConfigError::Missing("TOKEN"))?;

        let chat_raw = non_empty("CHAT_ID").ok_or(ConfigError::Missing("CHAT_ID"))?;
        let chat = chat_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "CHAT_ID",
            value: chat_raw.clone(),
        })?;

        let db_path = non_empty("SQLITE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let debug = match non_empty("DEBUG") {
            None => false,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "DEBUG",
                        value: v,
                    })
                }
            },
        };

        let openai_api_key = non_empty("OPENAI_API_KEY");

        Ok(Self {
            token,
            chat,
            db_path,
            debug,
            openai_api_key,
        })
    }
}
