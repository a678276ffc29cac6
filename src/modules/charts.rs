//! Monthly mood charts.

use std::sync::Arc;

use anyhow::Result;
use macro_rules_attribute::derive;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use teloxide::utils::command::BotCommands;

use crate::common::{filter_command, BotCommandsExt, BotEnv, UpdateHandler};
use crate::report::{self, YearMonth};
use crate::timezone::reference_now;
use crate::utils::{format_to, BotExt};

#[derive(Clone, BotCommands, BotCommandsExt!)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(description = "chart of your moods for a month (YYYY-MM).")]
    MoodPlot(String),

    #[command(description = "list months with recorded moods.")]
    MoodMonths,
}

pub fn command_handler() -> UpdateHandler {
    filter_command::<Command>().endpoint(start)
}

async fn start(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    command: Command,
) -> Result<()> {
    match command {
        Command::MoodPlot(month) => cmd_mood_plot(bot, env, msg, &month).await,
        Command::MoodMonths => cmd_mood_months(bot, env, msg).await,
    }
}

/// Month requested by `/mood_plot`, the current one if omitted.
fn requested_month(arg: &str, env: &BotEnv) -> Result<YearMonth> {
    if arg.trim().is_empty() {
        Ok(YearMonth::of(&reference_now(env.config.reference_timezone)))
    } else {
        arg.parse()
    }
}

async fn cmd_mood_plot(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    arg: &str,
) -> Result<()> {
    let Some(user) = &msg.from else {
        return Ok(());
    };
    let month = match requested_month(arg, &env) {
        Ok(month) => month,
        Err(e) => {
            bot.reply_message(
                &msg,
                format!("Invalid month ({e}). Usage: /mood_plot [YYYY-MM]"),
            )
            .await?;
            return Ok(());
        }
    };

    let entries = crate::db::all_moods(&mut env.conn())?;
    let report = report::aggregate(&entries, user.id, month);
    if report.is_empty() {
        bot.reply_message(
            &msg,
            format!("No moods recorded for {} {}.", month.name(), month.year),
        )
        .await?;
        return Ok(());
    }

    let caption = report.summary();
    let dir = env.config.charts.dir.clone();
    let path =
        tokio::task::spawn_blocking(move || report::render(&report, &dir))
            .await??;

    let mut photo =
        bot.send_photo(msg.chat.id, InputFile::file(path)).caption(caption);
    if let Some(thread_id) = msg.thread_id {
        photo = photo.message_thread_id(thread_id);
    }
    photo.await?;
    Ok(())
}

async fn cmd_mood_months(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
) -> Result<()> {
    let Some(user) = &msg.from else {
        return Ok(());
    };
    let entries = crate::db::all_moods(&mut env.conn())?;
    let months = report::months_with_entries(&entries, user.id);

    let text = if months.is_empty() {
        "You haven't recorded any moods yet.".to_string()
    } else {
        let mut text = "Months with recorded moods:".to_string();
        for month in months {
            format_to!(text, "\n{month} ({} {})", month.name(), month.year);
        }
        format_to!(text, "\n\nUse /mood_plot YYYY-MM to see one of them.");
        text
    };
    bot.reply_message(&msg, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::common::test_env;
    use crate::scheduler::testing::RecordingSender;
    use crate::scheduler::ReminderScheduler;

    #[test]
    fn test_requested_month() {
        let (sender, _rx) = RecordingSender::new(false);
        let env = test_env(ReminderScheduler::new(
            chrono_tz::Europe::Moscow,
            Arc::new(sender),
            CancellationToken::new(),
        ));

        assert_eq!(
            requested_month("2024-05", &env).unwrap(),
            YearMonth::new(2024, 5).unwrap()
        );
        assert_eq!(
            requested_month("  ", &env).unwrap(),
            YearMonth::of(&reference_now(chrono_tz::Europe::Moscow))
        );
        assert!(requested_month("2024-13", &env).is_err());
        assert!(requested_month("May", &env).is_err());
    }

    #[test]
    fn plot_argument_is_optional() {
        assert!(matches!(
            Command::parse("/mood_plot", "moodbot"),
            Ok(Command::MoodPlot(arg)) if arg.is_empty()
        ));
        assert!(matches!(
            Command::parse("/mood_plot 2024-05", "moodbot"),
            Ok(Command::MoodPlot(arg)) if arg == "2024-05"
        ));
    }
}
