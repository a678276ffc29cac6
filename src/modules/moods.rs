//! Recording moods, from the menu or from a daily reminder.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::NaiveTime;
use diesel::{QueryResult, SqliteConnection};
use futures::future::BoxFuture;
use macro_rules_attribute::derive;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};

use crate::common::{
    filter_command, main_menu, BotCommandsExt, BotEnv, UpdateHandler,
};
use crate::mood::Mood;
use crate::scheduler::{DeliveryError, PromptSender};
use crate::timezone::{format_hh_mm, reference_now};
use crate::utils::{format_to, BotExt, ResultExt};

/// Number of entries shown by `/mydata`.
const RECENT_ENTRIES: i64 = 5;

const MOOD_BUTTONS_PER_ROW: usize = 2;

#[derive(Clone, BotCommands, BotCommandsExt!)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(rename = "mydata", description = "show your latest moods.")]
    MyData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CallbackData {
    Record,
    Mood(Mood),
}

pub fn command_handler() -> UpdateHandler {
    filter_command::<Command>().endpoint(start)
}

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

fn parse_callback(data: &str) -> Option<CallbackData> {
    if data == "menu:record" {
        return Some(CallbackData::Record);
    }
    let tag = data.strip_prefix("mood:")?;
    tag.parse().ok().map(CallbackData::Mood)
}

fn filter_callbacks(callback: CallbackQuery) -> Option<CallbackData> {
    parse_callback(callback.data.as_ref()?)
}

/// One button per mood, in catalogue order.
pub fn mood_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(Mood::ALL.chunks(MOOD_BUTTONS_PER_ROW).map(
        |row| {
            row.iter()
                .map(|mood| {
                    InlineKeyboardButton::callback(
                        mood.label(),
                        format!("mood:{}", mood.tag()),
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
        Command::MyData => cmd_my_data(bot, env, msg).await,
    }
}

async fn cmd_my_data(bot: Bot, env: Arc<BotEnv>, msg: Message) -> Result<()> {
    let Some(user) = &msg.from else {
        return Ok(());
    };
    let entries =
        crate::db::recent_moods(&mut env.conn(), user.id, RECENT_ENTRIES)?;

    let text = if entries.is_empty() {
        "You haven't recorded any moods yet.".to_string()
    } else {
        let mut text = "Your latest moods:".to_string();
        for entry in &entries {
            format_to!(
                text,
                "\n{} {}",
                entry.recorded_at.format("%Y-%m-%d %H:%M"),
                entry.label
            );
        }
        text
    };
    bot.reply_message(&msg, text).await?;
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    env: Arc<BotEnv>,
    callback: CallbackQuery,
    data: CallbackData,
) -> Result<()> {
    match data {
        CallbackData::Record => {
            if let Some(edit) =
                bot.edit_callback_message(&callback, "How are you feeling?")
            {
                edit.reply_markup(mood_keyboard()).await?;
            }
            bot.answer_callback_query(&callback.id).await?;
        }
        CallbackData::Mood(mood) => {
            handle_callback_mood(bot, env, callback, mood).await?;
        }
    }
    Ok(())
}

async fn handle_callback_mood(
    bot: Bot,
    env: Arc<BotEnv>,
    callback: CallbackQuery,
    mood: Mood,
) -> Result<()> {
    let user_id = callback.from.id;
    crate::db::add_mood(
        &mut env.conn(),
        user_id,
        mood,
        reference_now(env.config.reference_timezone),
    )?;
    crate::metrics::mood_recorded(mood);
    log::info!("User {user_id} recorded mood {}", mood.tag());

    if let Some(edit) = bot.edit_callback_message(
        &callback,
        format!("Recorded: {}. Thank you!", mood.label()),
    ) {
        edit.await.log_error("Failed to edit mood keyboard");
    }
    bot.answer_callback_query(&callback.id)
        .text(format!("{} Saved", mood.emoji()))
        .await?;

    let chat_id = callback
        .regular_message()
        .map_or_else(|| ChatId::from(user_id), |m| m.chat.id);
    bot.send_message(chat_id, "What would you like to do next?")
        .reply_markup(main_menu())
        .await?;
    Ok(())
}

/// Sends daily reminders through Telegram.
pub struct TelegramPrompter {
    bot: Bot,
    conn: Mutex<SqliteConnection>,
}

impl TelegramPrompter {
    pub const fn new(bot: Bot, conn: SqliteConnection) -> Self {
        Self { bot, conn: Mutex::new(conn) }
    }

    async fn deliver(
        &self,
        user_id: UserId,
        time: NaiveTime,
    ) -> Result<(), DeliveryError> {
        let result = self
            .bot
            .send_message(
                ChatId::from(user_id),
                "How are you feeling right now? Pick your mood:",
            )
            .reply_markup(mood_keyboard())
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unreachable(&e) => {
                forget_reminder(&mut self.conn.lock().unwrap(), user_id, time)
                    .map_err(|e| DeliveryError::Other(e.into()))?;
                Err(DeliveryError::Blocked(e.to_string()))
            }
            Err(e) => Err(DeliveryError::Other(e.into())),
        }
    }
}

impl PromptSender for TelegramPrompter {
    fn send_prompt(
        &self,
        user_id: UserId,
        time: NaiveTime,
    ) -> BoxFuture<'_, Result<(), DeliveryError>> {
        Box::pin(self.deliver(user_id, time))
    }
}

/// Drop the stored reminder of an unreachable user, unless it was changed
/// to another time after the job fired.
fn forget_reminder(
    conn: &mut SqliteConnection,
    user_id: UserId,
    time: NaiveTime,
) -> QueryResult<()> {
    let time = format_hh_mm(time);
    if crate::db::clear_notification_time_if(conn, user_id, &time)? {
        log::info!("Reminder of unreachable user {user_id} cleared");
    }
    Ok(())
}

/// Whether the error means the user can't receive messages from the bot.
const fn is_unreachable(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Api(
            ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::CantInitiateConversation
        )
    )
}

#[cfg(test)]
mod tests {
    use teloxide::types::InlineKeyboardButtonKind;

    use super::*;

    #[test]
    fn test_parse_callback() {
        assert_eq!(parse_callback("menu:record"), Some(CallbackData::Record));
        assert_eq!(
            parse_callback("mood:calm"),
            Some(CallbackData::Mood(Mood::Calm))
        );
        assert_eq!(parse_callback("mood:grumpy"), None);
        assert_eq!(parse_callback("menu:time"), None);
        assert_eq!(parse_callback("tz:2"), None);
        assert_eq!(parse_callback("calm"), None);
    }

    #[test]
    fn keyboard_has_every_mood_in_order() {
        let data = mood_keyboard()
            .inline_keyboard
            .into_iter()
            .flatten()
            .map(|b| match b.kind {
                InlineKeyboardButtonKind::CallbackData(d) => d,
                kind => panic!("unexpected button {kind:?}"),
            })
            .collect::<Vec<_>>();
        let expected = Mood::ALL
            .iter()
            .map(|m| format!("mood:{}", m.tag()))
            .collect::<Vec<_>>();
        assert_eq!(data.len(), 20);
        assert_eq!(data, expected);
    }

    #[test]
    fn unreachable_user_loses_stored_reminder() {
        let mut conn = crate::db::test_connection();
        let user = UserId(7);
        crate::db::set_notification_time(&mut conn, user, "08:00").unwrap();
        crate::db::set_notification_time(&mut conn, UserId(8), "08:00")
            .unwrap();

        let at = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        forget_reminder(&mut conn, user, at).unwrap();

        let setting = crate::db::notification_setting(&mut conn, user)
            .unwrap()
            .unwrap();
        assert_eq!(setting.notification_time, None);
        let scheduled = crate::db::scheduled_settings(&mut conn)
            .unwrap()
            .into_iter()
            .map(|s| UserId::from(s.user_id))
            .collect::<Vec<_>>();
        assert_eq!(scheduled, vec![UserId(8)]);
    }

    #[test]
    fn replaced_reminder_survives_old_delivery() {
        let mut conn = crate::db::test_connection();
        let user = UserId(7);
        crate::db::set_notification_time(&mut conn, user, "09:00").unwrap();

        let old = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        forget_reminder(&mut conn, user, old).unwrap();

        let setting = crate::db::notification_setting(&mut conn, user)
            .unwrap()
            .unwrap();
        assert_eq!(setting.notification_time.as_deref(), Some("09:00"));
    }

    #[test]
    fn unreachable_errors() {
        assert!(is_unreachable(&RequestError::Api(ApiError::BotBlocked)));
        assert!(is_unreachable(&RequestError::Api(
            ApiError::UserDeactivated
        )));
        assert!(!is_unreachable(&RequestError::Api(
            ApiError::MessageNotModified
        )));
    }
}
