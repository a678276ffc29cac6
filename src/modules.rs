//! Modules that define the bot's functionality.

use teloxide::types::BotCommand;
use teloxide::utils::command::BotCommands;

pub mod basic;
pub mod charts;
pub mod moods;
pub mod reminders;

/// Commands shown in the Telegram menu and in `/help`.
pub fn bot_commands() -> Vec<BotCommand> {
    [
        basic::Command::bot_commands(),
        moods::Command::bot_commands(),
        reminders::Command::bot_commands(),
        charts::Command::bot_commands(),
    ]
    .concat()
}
