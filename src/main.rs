#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Restriction lints
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::deref_by_slicing,
    clippy::if_then_some_else_none,
    clippy::undocumented_unsafe_blocks,
    clippy::unnecessary_cast,
    clippy::unnecessary_safety_comment
)]
// False positives
#![allow(clippy::needless_pass_by_value)] // for dptree handlers
// Style
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::module_name_repetitions)]

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use argh::FromArgs;
use common::{MyDialogue, State};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use metrics_exporter_prometheus::PrometheusBuilder;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::{Dispatcher, HandlerExt, UpdateFilterExt};
use teloxide::payloads::AnswerCallbackQuerySetters;
use teloxide::requests::Requester;
use teloxide::types::{CallbackQuery, Message, Update};
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use utils::ResultExt;

mod common;
mod config;
mod db;
mod metrics;
mod models;
mod modules;
mod mood;
mod report;
mod scheduler;
mod schema;
mod timezone;
mod utils;
mod web_srv;

static VERSION: OnceLock<String> = OnceLock::new();

fn version() -> &'static str {
    VERSION.get().map_or("unknown", String::as_str)
}

/// moodbot
#[derive(FromArgs, PartialEq, Debug)]
struct Args {
    #[argh(option, hidden_help = true, long = "-set-revision")]
    set_revision: Option<String>,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Bot(SubCommandBot),
    Migrate(SubCommandMigrate),
}

/// run the bot
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "bot")]
struct SubCommandBot {
    /// config file
    #[argh(positional)]
    config_file: OsString,
}

/// create or upgrade the database schema
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "migrate")]
struct SubCommandMigrate {
    /// db file
    #[argh(positional)]
    db_file: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
    let args: Args = argh::from_env();
    VERSION
        .set(args.set_revision.unwrap_or_else(|| {
            git_version::git_version!(fallback = "unknown").to_string()
        }))
        .map_err(|_| anyhow::anyhow!("VERSION is already set"))?;
    log::info!("Version {}", version());
    match args.subcommand {
        SubCommand::Bot(c) => run_bot(&c.config_file).await?,
        SubCommand::Migrate(c) => {
            let mut conn = SqliteConnection::establish(&c.db_file)?;
            db::run_migrations(&mut conn)?;
        }
    }
    Ok(())
}

async fn run_bot(config_fpath: &OsStr) -> Result<()> {
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    metrics::register_metrics();

    let config = config::Config::load(config_fpath)?;

    let mut conn = SqliteConnection::establish(&config.db)?;
    db::run_migrations(&mut conn)?;

    if let Some(path) = &config.charts.font {
        report::register_font(path)
            .log_error("Failed to load chart font, using the bundled one");
    }

    let bot = Bot::new(&config.telegram.token);
    let cancel = CancellationToken::new();

    let scheduler = scheduler::ReminderScheduler::new(
        config.reference_timezone,
        Arc::new(modules::moods::TelegramPrompter::new(
            bot.clone(),
            SqliteConnection::establish(&config.db)?,
        )),
        cancel.child_token(),
    );
    for setting in db::scheduled_settings(&mut conn)? {
        if let Some(time) = &setting.notification_time {
            scheduler.schedule(setting.user_id.into(), time);
        }
    }
    log::info!("Restored {} reminders", scheduler.len());

    let db_path = PathBuf::from(&config.db);
    let bot_env = Arc::new(common::BotEnv {
        conn: Mutex::new(conn),
        config: Arc::new(config),
        scheduler: Arc::clone(&scheduler),
    });

    bot.set_my_commands(modules::bot_commands())
        .await
        .log_error("Failed to set bot commands");

    let mut dispatcher = Dispatcher::builder(
        bot.clone(),
        dptree::entry()
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| !msg.chat.is_channel())
                    .enter_dialogue::<Message, InMemStorage<State>, State>()
                    .inspect_async(reset_dialogue_on_command)
                    .branch(modules::basic::command_handler())
                    .branch(modules::moods::command_handler())
                    .branch(modules::reminders::command_handler())
                    .branch(modules::charts::command_handler())
                    .branch(modules::reminders::time_input_handler())
                    .endpoint(drop_endpoint),
            )
            .branch(
                Update::filter_callback_query()
                    .enter_dialogue::<
                        CallbackQuery,
                        InMemStorage<State>,
                        State,
                    >()
                    .branch(modules::moods::callback_handler())
                    .branch(modules::reminders::callback_handler())
                    .endpoint(drop_callback_query),
            )
            .endpoint(drop_endpoint),
    )
    .dependencies(dptree::deps![
        InMemStorage::<State>::new(),
        Arc::clone(&bot_env)
    ])
    .build();
    let bot_shutdown_token = dispatcher.shutdown_token().clone();
    let mut join_handles = Vec::new();
    join_handles.push(tokio::spawn(async move { dispatcher.dispatch().await }));

    join_handles.push(tokio::spawn(web_srv::run(
        SqliteConnection::establish(&bot_env.config.db)?,
        db_path,
        bot_env.config.server_addr,
        prometheus,
        cancel.clone(),
    )));

    run_signal_handler(bot_shutdown_token, cancel.clone());

    futures::future::join_all(join_handles).await;
    scheduler.shutdown();
    log::info!("Bye");

    Ok(())
}

async fn reset_dialogue_on_command(msg: Message, dialogue: MyDialogue) {
    let message_is_command =
        msg.entities().and_then(|e| e.first()).is_some_and(|e| {
            e.kind == teloxide::types::MessageEntityKind::BotCommand
                && e.offset == 0
        });
    if message_is_command {
        dialogue.update(State::Start).await.ok();
    }
}

async fn drop_callback_query(
    bot: Bot,
    callback_query: CallbackQuery,
) -> Result<()> {
    log::warn!(
        "Unexpected callback query from {}: {:?}",
        callback_query.from.id,
        callback_query.data
    );
    bot.answer_callback_query(&callback_query.id)
        .text("Error: unexpected callback query")
        .await?;
    Ok(())
}

async fn drop_endpoint() -> Result<()> {
    Ok(())
}

fn run_signal_handler(
    bot_shutdown_token: teloxide::dispatching::ShutdownToken,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for SIGINT: {e}");
                return;
            }
            cancel.cancel();
            match bot_shutdown_token.shutdown() {
                #[allow(
                    clippy::redundant_pub_crate,
                    // reason = "https://github.com/rust-lang/rust-clippy/issues/10636"
                )]
                Ok(f) => {
                    log::info!(
                        "^C received, trying to shutdown the dispatcher..."
                    );
                    tokio::select! {
                        () = f => {
                            log::info!("dispatcher is shutdown...");
                        }
                        _ = tokio::signal::ctrl_c() => {
                            log::info!("Got another ^C, exiting immediately");
                            std::process::exit(0);
                        }
                    }
                }
                Err(_) => {
                    log::info!(
                        "^C received, the dispatcher isn't running, \
                         ignoring the signal"
                    );
                }
            }
        }
    });
}
