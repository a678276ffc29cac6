//! Daily reminder time and timezone of a user.
//!
//! Times are entered in the user's local time and stored in the reference
//! timezone, see [`crate::timezone`].

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveTime;
use macro_rules_attribute::derive;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;

use crate::common::{
    filter_command, main_menu, BotCommandsExt, BotEnv, MyDialogue, State,
    UpdateHandler,
};
use crate::timezone::{
    format_hh_mm, from_reference, offset_label, parse_hh_mm, parse_time_input,
    reference_now, reference_utc_hours, to_reference, OFFSET_CHOICES,
    OFFSET_RANGE,
};
use crate::utils::{format_to, BotExt};

const OFFSET_BUTTONS_PER_ROW: usize = 3;

#[derive(Clone, BotCommands, BotCommandsExt!)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(description = "choose your timezone.")]
    SetTimezone,

    #[command(description = "turn off the daily reminder.")]
    ReminderOff,

    #[command(description = "cancel the current action.")]
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CallbackData {
    SetTime,
    Offset(i32),
}

pub fn command_handler() -> UpdateHandler {
    filter_command::<Command>().endpoint(start)
}

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

/// Handler for the text sent after "Reminder time" was pressed.
pub fn time_input_handler() -> UpdateHandler {
    dptree::case![State::WaitingForNotificationTime].endpoint(receive_time)
}

fn parse_callback(data: &str) -> Option<CallbackData> {
    if data == "menu:time" {
        return Some(CallbackData::SetTime);
    }
    let offset = data.strip_prefix("tz:")?.parse().ok()?;
    OFFSET_RANGE.contains(&offset).then_some(CallbackData::Offset(offset))
}

fn filter_callbacks(callback: CallbackQuery) -> Option<CallbackData> {
    parse_callback(callback.data.as_ref()?)
}

fn timezone_keyboard(reference_utc_hours: i32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(OFFSET_CHOICES.chunks(OFFSET_BUTTONS_PER_ROW).map(
        |row| {
            row.iter()
                .map(|&offset| {
                    InlineKeyboardButton::callback(
                        offset_label(reference_utc_hours, offset),
                        format!("tz:{offset}"),
                    )
                })
                .collect::<Vec<_>>()
        },
    ))
}

async fn start(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    command: Command,
) -> Result<()> {
    match command {
        Command::SetTimezone => {
            let tz = env.config.reference_timezone;
            let text = format!(
                "Choose your timezone. It is {} now in {tz}, the reference \
                 timezone.",
                reference_now(tz).format("%H:%M"),
            );
            bot.reply_message(&msg, text)
                .reply_markup(timezone_keyboard(reference_utc_hours(tz)))
                .await?;
        }
        Command::ReminderOff => {
            let Some(user) = &msg.from else {
                return Ok(());
            };
            let text = if turn_off_reminder(&env, user.id)? {
                "Your daily reminder is turned off."
            } else {
                "You have no daily reminder."
            };
            bot.reply_message(&msg, text).reply_markup(main_menu()).await?;
        }
        Command::Cancel => {
            // The dialogue is already reset by the dispatcher.
            bot.reply_message(&msg, "Cancelled.")
                .reply_markup(main_menu())
                .await?;
        }
    }
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    dialogue: MyDialogue,
    env: Arc<BotEnv>,
    callback: CallbackQuery,
    data: CallbackData,
) -> Result<()> {
    match data {
        CallbackData::SetTime => {
            handle_callback_set_time(bot, dialogue, env, callback).await
        }
        CallbackData::Offset(offset) => {
            handle_callback_offset(bot, env, callback, offset).await
        }
    }
}

async fn handle_callback_set_time(
    bot: Bot,
    dialogue: MyDialogue,
    env: Arc<BotEnv>,
    callback: CallbackQuery,
) -> Result<()> {
    let setting =
        crate::db::notification_setting(&mut env.conn(), callback.from.id)?;

    let mut text = String::new();
    if let Some((time, offset)) = setting.as_ref().and_then(|s| {
        Some((parse_hh_mm(s.notification_time.as_deref()?)?, s.utc_offset))
    }) {
        format_to!(
            text,
            "Your reminder is set for {} every day.\n",
            from_reference(time, offset)
        );
    }
    format_to!(
        text,
        "Send me the time for a daily reminder in HH:MM format, e.g. 21:30. \
         Use /set_timezone if you are not in the {} timezone, or /cancel.",
        env.config.reference_timezone
    );

    dialogue.update(State::WaitingForNotificationTime).await?;
    bot.answer_callback_query(&callback.id).await?;
    bot.send_message(dialogue.chat_id(), text).await?;
    Ok(())
}

async fn handle_callback_offset(
    bot: Bot,
    env: Arc<BotEnv>,
    callback: CallbackQuery,
    offset: i32,
) -> Result<()> {
    let rescheduled = apply_utc_offset(&env, callback.from.id, offset)?;
    let reference_hours = reference_utc_hours(env.config.reference_timezone);
    let label = offset_label(reference_hours, offset);

    let mut text = format!("Timezone set to {label}.");
    match rescheduled {
        Some((local, true)) => {
            format_to!(text, " Your reminder stays at {local} local time.");
        }
        Some((_, false)) => {
            format_to!(
                text,
                " Failed to move your reminder, please set the time again."
            );
        }
        None => {}
    }

    bot.answer_callback_query(&callback.id).text(label).await?;
    match bot.edit_callback_message(&callback, text.clone()) {
        Some(edit) => {
            edit.await?;
        }
        None => {
            bot.send_message(ChatId::from(callback.from.id), text).await?;
        }
    }
    Ok(())
}

async fn receive_time(
    bot: Bot,
    dialogue: MyDialogue,
    env: Arc<BotEnv>,
    msg: Message,
) -> Result<()> {
    let (Some(user), Some(text)) = (&msg.from, msg.text()) else {
        return Ok(());
    };
    if text.starts_with('/') {
        return Ok(());
    }

    let Some(local) = parse_time_input(text) else {
        bot.reply_message(
            &msg,
            "Invalid format. Send the time as HH:MM, e.g. 09:30, or /cancel.",
        )
        .await?;
        return Ok(());
    };

    let reply = match apply_notification_time(&env, user.id, local) {
        Ok(true) => {
            let local = format_hh_mm(local);
            format!("Done! I will remind you every day at {local}.")
        }
        Ok(false) => {
            "I could not set the reminder, please try again.".to_string()
        }
        Err(e) => {
            log::error!("Failed to set reminder for {}: {e:#}", user.id);
            "Something went wrong, please try again later.".to_string()
        }
    };
    dialogue.update(State::Start).await?;
    bot.reply_message(&msg, reply).reply_markup(main_menu()).await?;
    Ok(())
}

/// Schedule and store a reminder at `local`, the user's own time. Returns
/// whether the reminder was scheduled. Nothing is stored if it was not.
fn apply_notification_time(
    env: &BotEnv,
    user_id: UserId,
    local: NaiveTime,
) -> Result<bool> {
    let offset =
        crate::db::utc_offset(&mut env.conn(), user_id)?.unwrap_or(0);
    let reference = to_reference(local, offset);
    let previous = env.scheduler.job(user_id);
    if !env.scheduler.schedule(user_id, &reference) {
        return Ok(false);
    }
    store_scheduled(env, user_id, &reference, previous)?;
    Ok(true)
}

/// Store a new offset. If a reminder exists, it is moved so that it keeps
/// firing at the same local time. Returns that local time and whether
/// scheduling succeeded.
fn apply_utc_offset(
    env: &BotEnv,
    user_id: UserId,
    offset: i32,
) -> Result<Option<(String, bool)>> {
    let setting = {
        let mut conn = env.conn();
        let setting = crate::db::notification_setting(&mut conn, user_id)?;
        crate::db::set_utc_offset(&mut conn, user_id, offset)?;
        setting
    };

    let Some((old_reference, old_offset)) = setting.and_then(|s| {
        Some((parse_hh_mm(s.notification_time.as_deref()?)?, s.utc_offset))
    }) else {
        return Ok(None);
    };
    let local = from_reference(old_reference, old_offset);
    let Some(local_time) = parse_hh_mm(&local) else {
        return Ok(None);
    };
    let reference = to_reference(local_time, offset);
    let previous = env.scheduler.job(user_id);
    if !env.scheduler.schedule(user_id, &reference) {
        return Ok(Some((local, false)));
    }
    store_scheduled(env, user_id, &reference, previous)?;
    Ok(Some((local, true)))
}

/// Persist a reminder that was just scheduled. If storing fails, the job
/// goes back to `previous`, or is removed if there was none.
fn store_scheduled(
    env: &BotEnv,
    user_id: UserId,
    reference: &str,
    previous: Option<NaiveTime>,
) -> Result<()> {
    let stored =
        crate::db::set_notification_time(&mut env.conn(), user_id, reference);
    if stored.is_err() {
        match previous {
            Some(time) => {
                env.scheduler.schedule(user_id, &format_hh_mm(time));
            }
            None => {
                env.scheduler.remove(user_id);
            }
        }
    }
    Ok(stored?)
}

/// Clear the stored reminder and stop its job. Returns whether there was a
/// reminder.
fn turn_off_reminder(env: &BotEnv, user_id: UserId) -> Result<bool> {
    let had_time = {
        let mut conn = env.conn();
        let had_time = crate::db::notification_setting(&mut conn, user_id)?
            .is_some_and(|s| s.notification_time.is_some());
        crate::db::clear_notification_time(&mut conn, user_id)?;
        had_time
    };
    let removed = env.scheduler.remove(user_id);
    if had_time || removed {
        log::info!("User {user_id} turned off the reminder");
    }
    Ok(had_time || removed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::common::test_env;
    use crate::scheduler::testing::RecordingSender;
    use crate::scheduler::{PromptSender, ReminderScheduler};

    fn new_env() -> Arc<BotEnv> {
        let (sender, _rx) = RecordingSender::new(false);
        test_env(ReminderScheduler::new(
            chrono_tz::Europe::Moscow,
            Arc::new(sender) as Arc<dyn PromptSender>,
            CancellationToken::new(),
        ))
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn stored_time(env: &BotEnv, user_id: UserId) -> Option<String> {
        crate::db::notification_setting(&mut env.conn(), user_id)
            .unwrap()
            .and_then(|s| s.notification_time)
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(parse_callback("menu:time"), Some(CallbackData::SetTime));
        assert_eq!(parse_callback("tz:-3"), Some(CallbackData::Offset(-3)));
        assert_eq!(parse_callback("tz:5"), Some(CallbackData::Offset(5)));
        assert_eq!(parse_callback("tz:13"), None);
        assert_eq!(parse_callback("tz:abc"), None);
        assert_eq!(parse_callback("mood:calm"), None);
        assert_eq!(parse_callback("time"), None);
    }

    #[test]
    fn keyboard_offers_every_choice() {
        let buttons = timezone_keyboard(3)
            .inline_keyboard
            .into_iter()
            .flatten()
            .map(|b| b.text)
            .collect::<Vec<_>>();
        assert_eq!(buttons.len(), OFFSET_CHOICES.len());
        assert_eq!(buttons[0], "UTC+0 (-3 h)");
        assert_eq!(buttons[3], "UTC+3 (reference)");
        assert_eq!(buttons[8], "UTC+8 (+5 h)");
    }

    #[tokio::test]
    async fn time_is_normalized_with_offset() {
        let env = new_env();
        let user = UserId(42);
        crate::db::set_utc_offset(&mut env.conn(), user, 2).unwrap();

        assert!(apply_notification_time(&env, user, hm(10, 0)).unwrap());
        assert_eq!(stored_time(&env, user).as_deref(), Some("08:00"));
        assert_eq!(env.scheduler.job(user), Some(hm(8, 0)));
    }

    #[tokio::test]
    async fn time_without_offset_is_kept() {
        let env = new_env();
        let user = UserId(42);

        assert!(apply_notification_time(&env, user, hm(21, 30)).unwrap());
        assert_eq!(stored_time(&env, user).as_deref(), Some("21:30"));
        assert_eq!(env.scheduler.job(user), Some(hm(21, 30)));
    }

    #[tokio::test]
    async fn time_wraps_around_midnight() {
        let env = new_env();
        let user = UserId(42);
        crate::db::set_utc_offset(&mut env.conn(), user, 5).unwrap();

        assert!(apply_notification_time(&env, user, hm(1, 0)).unwrap());
        assert_eq!(stored_time(&env, user).as_deref(), Some("20:00"));
    }

    #[tokio::test]
    async fn offset_change_moves_reminder() {
        let env = new_env();
        let user = UserId(42);
        assert!(apply_notification_time(&env, user, hm(9, 0)).unwrap());

        let moved = apply_utc_offset(&env, user, -2).unwrap();
        assert_eq!(moved, Some(("09:00".to_string(), true)));
        assert_eq!(stored_time(&env, user).as_deref(), Some("11:00"));
        assert_eq!(env.scheduler.job(user), Some(hm(11, 0)));
        assert_eq!(
            crate::db::utc_offset(&mut env.conn(), user).unwrap(),
            Some(-2)
        );
    }

    #[tokio::test]
    async fn offset_without_reminder() {
        let env = new_env();
        let user = UserId(42);

        assert_eq!(apply_utc_offset(&env, user, 3).unwrap(), None);
        assert_eq!(stored_time(&env, user), None);
        assert_eq!(env.scheduler.job(user), None);
        assert_eq!(
            crate::db::utc_offset(&mut env.conn(), user).unwrap(),
            Some(3)
        );
    }

    #[test]
    fn unscheduled_time_is_not_stored() {
        // No tokio runtime here, so scheduling fails.
        let env = new_env();
        let user = UserId(42);
        assert!(!apply_notification_time(&env, user, hm(9, 0)).unwrap());
        assert_eq!(stored_time(&env, user), None);

        crate::db::set_notification_time(&mut env.conn(), user, "07:00")
            .unwrap();
        assert!(!apply_notification_time(&env, user, hm(9, 0)).unwrap());
        assert_eq!(stored_time(&env, user).as_deref(), Some("07:00"));
    }

    #[test]
    fn unscheduled_offset_change_keeps_time() {
        let env = new_env();
        let user = UserId(42);
        crate::db::set_notification_time(&mut env.conn(), user, "07:00")
            .unwrap();

        let moved = apply_utc_offset(&env, user, 2).unwrap();
        assert_eq!(moved, Some(("07:00".to_string(), false)));
        assert_eq!(stored_time(&env, user).as_deref(), Some("07:00"));
        assert_eq!(
            crate::db::utc_offset(&mut env.conn(), user).unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn failed_store_rolls_back_job() {
        use diesel::RunQueryDsl;

        let env = new_env();
        assert!(env.scheduler.schedule(UserId(1), "07:00"));
        assert!(env.scheduler.schedule(UserId(1), "09:00"));
        assert!(env.scheduler.schedule(UserId(2), "09:00"));
        diesel::sql_query("DROP TABLE users")
            .execute(&mut *env.conn())
            .unwrap();

        let stored = store_scheduled(&env, UserId(1), "09:00", Some(hm(7, 0)));
        assert!(stored.is_err());
        assert_eq!(env.scheduler.job(UserId(1)), Some(hm(7, 0)));

        assert!(store_scheduled(&env, UserId(2), "09:00", None).is_err());
        assert_eq!(env.scheduler.job(UserId(2)), None);
    }

    #[tokio::test]
    async fn reminder_can_be_turned_off() {
        let env = new_env();
        let user = UserId(42);
        assert!(apply_notification_time(&env, user, hm(9, 0)).unwrap());

        assert!(turn_off_reminder(&env, user).unwrap());
        assert_eq!(stored_time(&env, user), None);
        assert_eq!(env.scheduler.job(user), None);
        assert!(env.scheduler.is_empty());

        assert!(!turn_off_reminder(&env, user).unwrap());
    }
}
