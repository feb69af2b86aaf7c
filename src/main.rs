use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use spendbot::config::Config;
use spendbot::ledger::categories::spawn_scheduled_refresh;
use spendbot::ledger::{
    Calendar, CategoryCache, Chat, Command, ConversationEngine, GoogleSheets, HttpRateSource, InputEvent, Sheet,
    TelegramClient, UserRegistry,
};
use spendbot::telegram_log;

const SHEETS_TIMEOUT: Duration = Duration::from_secs(30);

struct BotState {
    engine: ConversationEngine,
    telegram: TelegramClient,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "spendbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("spendbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
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
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting spendbot...");
    info!("Loaded config from {config_path}");
    info!(
        "Spreadsheet {} (data: {}, categories: {})",
        config.sheets.spreadsheet_id, config.sheets.data_sheet, config.sheets.config_sheet
    );

    let sheet: Arc<dyn Sheet> = Arc::new(GoogleSheets::new(
        config.sheets.clone(),
        config.google_token_command.clone(),
        SHEETS_TIMEOUT,
    ));

    let categories = Arc::new(CategoryCache::new(sheet.clone()));
    if let Err(e) = categories.refresh().await {
        warn!("Starting without categories, will retry on first use: {e}");
    }
    if let Some(schedule) = config.category_refresh.clone() {
        info!("⏰ Scheduled category refresh enabled");
        spawn_scheduled_refresh(categories.clone(), schedule);
    }

    let users = match UserRegistry::open(
        &config.data_dir.join("users.db"),
        config.users.clone(),
        config.registration_open,
    ) {
        Ok(users) => users,
        Err(e) => {
            eprintln!("Failed to open user registry: {e}");
            std::process::exit(1);
        }
    };

    let rates = Arc::new(HttpRateSource::new(config.rates_endpoint.clone(), config.rate_timeout));
    let engine = ConversationEngine::new(
        config.engine_settings(),
        Arc::new(users),
        sheet,
        categories,
        rates,
        Calendar::new(config.timezone),
    );
    let state = Arc::new(BotState {
        engine,
        telegram: TelegramClient::new(bot.clone()),
    });

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {e}");
    }

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_text))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    info!("📨 {:?} from chat {}", cmd, chat_id);

    let reply = match cmd {
        Command::Start => state.engine.menu(chat_id).await,
        Command::Help => state.engine.help(chat_id, &Command::descriptions().to_string()).await,
        Command::Add => state.engine.start_add(chat_id).await,
        Command::Stats => state.engine.start_stats(chat_id).await,
        Command::Cancel | Command::Stop => state.engine.cancel(chat_id).await,
        Command::Register(name) => state.engine.register(chat_id, &name).await,
        Command::Reloadcats => state.engine.reload_categories(chat_id).await,
    };
    state.telegram.prompt(chat_id, &reply).await.ok();
    Ok(())
}

async fn handle_text(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;

    let reply = state.engine.handle(chat_id, InputEvent::text(text)).await;
    state.telegram.prompt(chat_id, &reply).await.ok();
    Ok(())
}

async fn handle_callback(q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    state.telegram.answer_callback(&q).await;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = message.chat().id.0;
    state.telegram.clear_keyboard(chat_id, message.id().0).await;

    let reply = state.engine.handle(chat_id, InputEvent::choice(data)).await;
    state.telegram.prompt(chat_id, &reply).await.ok();
    Ok(())
}
