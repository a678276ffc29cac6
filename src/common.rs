//! Common helpers to be used by various bot modules.

use std::sync::{Arc, Mutex, MutexGuard};

use diesel::SqliteConnection;
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Me, Message};
use teloxide::utils::command::BotCommands;
use teloxide::Bot;

use crate::config::Config;
use crate::scheduler::ReminderScheduler;
use crate::utils::BotExt;

/// Wrapper around [`teloxide::dispatching::UpdateHandler`] to be used in this
/// crate.
pub type UpdateHandler = teloxide::dispatching::UpdateHandler<anyhow::Error>;

pub type MyDialogue = Dialogue<State, InMemStorage<State>>;

/// Per-chat conversation state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Start,
    /// "Reminder time" was pressed, the next text message is the time.
    WaitingForNotificationTime,
}

/// Access rules describing where and who can execute a command.
#[derive(Eq, PartialEq, Debug)]
pub struct CommandAccessRules {
    /// Require an user to be a bot admin to execute this command
    pub admin: bool,
    /// Allow users to execute this command in private chat with bot
    pub in_private: bool,
    /// Allow users to execute this command in group chat
    pub in_group: bool,
}

impl CommandAccessRules {
    pub const fn new() -> Self {
        Self { admin: false, in_private: true, in_group: false }
    }
}

impl Default for CommandAccessRules {
    fn default() -> Self {
        Self::new()
    }
}

/// An extension to [`BotCommands`] trait that allows to specify command rules
/// for each command.
///
/// [`BotCommands`]: teloxide::utils::command::BotCommands
pub trait BotCommandsExtTrait: BotCommands {
    const COMMAND_RULES: &'static [CommandAccessRules];
    fn command_rules(&self) -> CommandAccessRules;
}

/// Bot environment: global state shared between all handlers.
pub struct BotEnv {
    pub conn: Mutex<SqliteConnection>,
    pub config: Arc<Config>,
    pub scheduler: Arc<ReminderScheduler>,
}

impl BotEnv {
    pub fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        self.conn.lock().unwrap()
    }
}

/// Derive macro for [`BotCommandsExtTrait`] trait. Should be applied with
/// [`macro_rules_attribute::derive`].
macro_rules! BotCommandsExt {
    (
        $( #[ $_attr:meta ] )*
        $pub:vis
        enum $name:ident {
            $(
                $( #[ $($attr:tt)* ] )*
                $item:ident $( ( $($item_args:tt)* ) )?
            ),* $(,)?
        }
    ) => {
        impl $crate::common::BotCommandsExtTrait for $name {
            const COMMAND_RULES: &'static [$crate::common::CommandAccessRules] =
                &[$({
                    #[allow(unused_mut)]
                    let mut meta = $crate::common::CommandAccessRules::new();
                    BotCommandsExt!(
                        impl set_meta;
                        meta;
                        $( #[ $($attr)* ] )*
                    );
                    meta
                }),*]
            ;
            fn command_rules(&self) -> $crate::common::CommandAccessRules {
                match self {$(
                    BotCommandsExt!(
                        impl skip_item_args;
                        $item $( ( $($item_args)* ) )?
                    ) => {
                        #[allow(unused_mut)]
                        let mut meta =
                            $crate::common::CommandAccessRules::default();
                        BotCommandsExt!(
                            impl set_meta;
                            meta;
                            $( #[ $($attr)* ] )*
                        );
                        meta
                    }
                )*}
            }
        }
    };

    // Internal rules, using <https://stackoverflow.com/a/40484901> trick
    // set_meta
    (
        impl set_meta;
        $name:expr;
        #[custom( $( $meta_key:ident = $meta_value:expr ),* $(,)? )]
        $( #[ $( $rest:tt )* ] )*
    ) => {
        $( $name.$meta_key = $meta_value; )*
        BotCommandsExt!(impl set_meta; $name; $( #[ $( $rest )* ] )* );
    };
    (
        impl set_meta;
        $name:expr;
        #[ $attr:meta ]
        $( #[ $( $rest:tt )* ] )*
    ) => {
        BotCommandsExt!(impl set_meta; $name; $( #[ $( $rest )* ] )* );
    };
    (
        impl set_meta;
        $name:expr;
    ) => {};

    // skip_item_args
    (impl skip_item_args; $v:ident ) => { Self::$v };
    (impl skip_item_args; $v:ident($($t:ty),+) ) => { Self::$v(..) };
}

pub(crate) use BotCommandsExt;

/// Similar to [`teloxide::filter_command`], but for commands implementing
/// [`BotCommandsExtTrait`].
#[must_use]
pub fn filter_command<C>() -> UpdateHandler
where
    C: BotCommands + BotCommandsExtTrait + Send + Sync + 'static,
{
    dptree::filter_map_async(filter_command_impl::<C>)
}

async fn filter_command_impl<C>(
    bot: Bot,
    me: Me,
    msg: Message,
    env: Arc<BotEnv>,
) -> Option<C>
where
    C: BotCommands + BotCommandsExtTrait + Send + Sync + 'static,
{
    let cmd = C::parse(msg.text()?, &me.user.username?).ok()?;
    let rules = cmd.command_rules();

    let error_text = if !rules.in_group
        && (msg.chat.is_group() || msg.chat.is_supergroup())
    {
        Some("This command is only available in a private chat with me")
    } else if !rules.in_private && msg.chat.is_private() {
        Some("This command is not allowed in private chats")
    } else if rules.admin && !env.config.is_admin(msg.from.as_ref()?.id) {
        Some("You must be an admin to execute this command")
    } else {
        None
    };

    if let Some(error_text) = error_text {
        let _ = bot.reply_message(&msg, error_text).await;
        return None;
    }

    Some(cmd)
}

/// The persistent main menu.
pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([
        [InlineKeyboardButton::callback("📝 Record mood", "menu:record")],
        [InlineKeyboardButton::callback("⏰ Reminder time", "menu:time")],
    ])
}

#[cfg(test)]
pub fn test_env(scheduler: Arc<ReminderScheduler>) -> Arc<BotEnv> {
    Arc::new(BotEnv {
        conn: Mutex::new(crate::db::test_connection()),
        config: Arc::new(Config::example()),
        scheduler,
    })
}
