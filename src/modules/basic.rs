//! Greeting, menu and help.

use std::sync::Arc;

use anyhow::Result;
use macro_rules_attribute::derive;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::common::{
    filter_command, main_menu, BotCommandsExt, BotEnv, UpdateHandler,
};
use crate::utils::{format_to, BotExt};

#[derive(Clone, BotCommands, BotCommandsExt!)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(description = "start the bot.")]
    Start,

    #[command(description = "show the main menu.")]
    Menu,

    #[command(description = "display this text.")]
    Help,
}

#[derive(Clone, BotCommands, BotCommandsExt!)]
#[command(rename_rule = "snake_case")]
enum AdminCommand {
    #[custom(admin = true)]
    Stats,
}

pub fn command_handler() -> UpdateHandler {
    dptree::entry()
        .branch(filter_command::<Command>().endpoint(start))
        .branch(filter_command::<AdminCommand>().endpoint(admin))
}

async fn start(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    command: Command,
) -> Result<()> {
    match command {
        Command::Start => {
            if let Some(user) = &msg.from {
                let mut conn = env.conn();
                if !crate::db::has_user(&mut conn, user.id)? {
                    crate::db::set_utc_offset(&mut conn, user.id, 0)?;
                    log::info!("New user {}", user.id);
                }
            }
            bot.reply_message(
                &msg,
                "Hi! I will help you keep track of your mood. Record how you \
                 feel, pick a time for a daily reminder and get a chart of \
                 your month with /mood_plot.",
            )
            .reply_markup(main_menu())
            .await?;
        }
        Command::Menu => {
            bot.reply_message(&msg, "What would you like to do?")
                .reply_markup(main_menu())
                .await?;
        }
        Command::Help => {
            bot.reply_message(&msg, help_text()).await?;
        }
    }
    Ok(())
}

async fn admin(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    command: AdminCommand,
) -> Result<()> {
    match command {
        AdminCommand::Stats => {
            let (users, entries) = {
                let mut conn = env.conn();
                (
                    crate::db::user_ids(&mut conn)?.len(),
                    crate::db::count_moods(&mut conn)?,
                )
            };
            let mut text = String::new();
            format_to!(text, "Version: {}\n", crate::version());
            format_to!(text, "Users: {users}\n");
            format_to!(text, "Mood entries: {entries}\n");
            format_to!(text, "Active reminders: {}", env.scheduler.len());
            bot.reply_message(&msg, text).await?;
        }
    }
    Ok(())
}

fn help_text() -> String {
    let mut text = "These commands are supported:".to_string();
    for command in crate::modules::bot_commands() {
        let name = command.command.trim_start_matches('/');
        format_to!(text, "\n/{name} - {}", command.description);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_user_commands() {
        let text = help_text();
        let commands =
            ["/start", "/menu", "/mydata", "/mood_plot", "/reminder_off"];
        for command in commands {
            assert!(text.contains(command), "{command} missing in {text:?}");
        }
        assert!(!text.contains("/stats"));
    }
}
