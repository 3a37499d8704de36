mod app;
mod cleanup;
mod commands;
mod config;
mod database;
mod error;
mod llm;
mod messages;
mod modes;
mod mute;
mod platform;
mod quarantine;
mod roulette;
mod router;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use app::App;
use config::{ChatTarget, Config};
use database::Database;
use dptree::deps;
use error::Error;
use llm::{Classifier, OpenAiClassifier};
use platform::{CallbackQuery, ChatMessage, Platform, TelegramPlatform};
use teloxide::prelude::*;

async fn on_message(msg: Message, app: Arc<App>) -> Result<(), Error> {
    app.on_message(ChatMessage::from(&msg)).await
}

async fn on_callback(query: teloxide::types::CallbackQuery, app: Arc<App>) -> Result<(), Error> {
    app.on_callback(CallbackQuery::from(&query)).await
}

async fn run(config: Config) -> Result<(), Error> {
    let bot = Bot::new(&config.token);
    let telegram = TelegramPlatform::new(bot.clone());
    let me = telegram.identity().await?;

    let chat = match &config.chat {
        ChatTarget::Id(id) => *id,
        ChatTarget::Username(name) => telegram.resolve_chat(name).await?,
    };

    let database = Database::new(&config.db_path).await?;

    let classifier: Option<Arc<dyn Classifier>> = match &config.openai_api_key {
        Some(key) => Some(Arc::new(OpenAiClassifier::new(key.clone())?)),
        None => {
            log::warn!("OPENAI_API_KEY is not set, introductions won't be checked for spam");
            None
        }
    };

    let platform: Arc<dyn Platform> = Arc::new(telegram);
    let app = App::new(chat, platform, database, me, classifier).await?;

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(deps![app])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    let level = match &config {
        Ok(config) if config.debug => "debug",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    log::info!("Starting bot...");
    if let Err(e) = run(config).await {
        log::error!("Bot stopped: {e}");
        std::process::exit(1);
    }
}
