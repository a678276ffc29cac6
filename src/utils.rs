//! Small helpers shared by the bot modules.

use teloxide::payloads;
use teloxide::prelude::*;
use teloxide::requests::JsonRequest;

/// Appends formatted string to a `String`.
/// <https://github.com/rust-lang/rust-analyzer/blob/62268e474e9165de0cdb08d3794eec4b6ef1c6cd/crates/stdx/src/macros.rs#L13-L20>
macro_rules! format_to {
    ($buf:expr) => ();
    ($buf:expr, $lit:literal $($arg:tt)*) => {
        {
            use ::std::fmt::Write as _;
            let _ = ::std::write!($buf, $lit $($arg)*);
        }
    };
}
pub(crate) use format_to;

pub trait ResultExt<T> {
    /// Log the error, if any, and keep the result.
    fn log_error(&self, msg: &str) -> &Self;
    /// Log the error, if any, and turn the result into an option.
    fn log_ok(self, msg: &str) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for Result<T, E> {
    fn log_error(&self, msg: &str) -> &Self {
        if let Err(e) = self {
            log::error!("{msg}: {e:?}");
        }
        self
    }

    fn log_ok(self, msg: &str) -> Option<T> {
        self.map_err(|e| log::error!("{msg}: {e:?}")).ok()
    }
}

pub trait BotExt {
    /// Send a message to the chat and thread `msg` came from.
    fn reply_message<T: Into<String>>(
        &self,
        msg: &Message,
        text: T,
    ) -> JsonRequest<payloads::SendMessage>;

    /// Replace the text of the message a callback button is attached to.
    /// `None` if the message is too old to be edited.
    fn edit_callback_message<T: Into<String>>(
        &self,
        callback: &CallbackQuery,
        text: T,
    ) -> Option<JsonRequest<payloads::EditMessageText>>;
}

impl BotExt for Bot {
    fn reply_message<T: Into<String>>(
        &self,
        msg: &Message,
        text: T,
    ) -> JsonRequest<payloads::SendMessage> {
        let mut reply = self.send_message(msg.chat.id, text);
        reply.message_thread_id = msg.thread_id;
        reply
    }

    fn edit_callback_message<T: Into<String>>(
        &self,
        callback: &CallbackQuery,
        text: T,
    ) -> Option<JsonRequest<payloads::EditMessageText>> {
        let message = callback.regular_message()?;
        Some(self.edit_message_text(message.chat.id, message.id, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_to() {
        let mut s = String::from("a");
        format_to!(s, "{}-{}", 1, 2);
        format_to!(s);
        assert_eq!(s, "a1-2");
    }

    #[test]
    fn test_log_ok() {
        assert_eq!(Ok::<_, &str>(1).log_ok("unused"), Some(1));
        assert_eq!(Err::<i32, _>("boom").log_ok("expected"), None);
        assert!(Err::<i32, _>("boom").log_error("expected").is_err());
    }
}
