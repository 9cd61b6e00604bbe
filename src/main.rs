use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use gemini_relay::config::Config;
use gemini_relay::relay::{
    commands, Command, GeminiClient, Incoming, RelayConfig, RelayEngine, ReplyTo, TelegramClient,
};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "gemini-relay.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gemini-relay.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting gemini-relay...");
    info!("Loaded config from {config_path}");
    info!("Model: {}, markup: {:?}, AI timeout: {:?}", config.model, config.markup_mode, config.ai_timeout);

    let bot = Bot::new(&config.telegram_bot_token);

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {e}");
    }

    let gemini = match GeminiClient::new(
        config.gemini_api_key.clone(),
        config.model.clone(),
        config.ai_timeout,
    ) {
        Ok(client) => client.with_base_url(config.gemini_base_url.clone()),
        Err(e) => {
            error!("Failed to create Gemini client: {e}");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(RelayEngine::new(
        RelayConfig {
            markup_mode: config.markup_mode,
            ai_timeout: config.ai_timeout,
        },
        Arc::new(TelegramClient::new(bot.clone())),
        Arc::new(gemini),
    ));

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .default_handler(|_| async {})
        .error_handler(LoggingErrorHandler::with_custom_text("Dispatcher error"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("👋 Stopped");
}

async fn handle_message(msg: Message, me: Me, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if msg.from.is_none() {
        return Ok(());
    }

    let request = commands::parse(text, me.username());
    let incoming = telegram_to_incoming(&msg);
    engine.dispatch(&incoming, request).await;

    Ok(())
}

fn telegram_to_incoming(msg: &Message) -> Incoming {
    let user = msg.from.as_ref();
    let user_id = user.map(|u| u.id.0 as i64).unwrap_or(0);
    let username = user
        .and_then(|u| u.username.as_deref())
        .unwrap_or_else(|| user.map(|u| u.first_name.as_str()).unwrap_or("unknown"))
        .to_string();

    let reply_to = msg.reply_to_message().map(|reply| ReplyTo {
        message_id: reply.id.0 as i64,
        text: reply.text().unwrap_or("").to_string(),
    });

    Incoming {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        user_id,
        username,
        text: msg.text().unwrap_or("").to_string(),
        reply_to,
    }
}
