//! The fixed catalogue of moods a user can record.
//!
//! Each mood has a stable string tag that is stored in the database, and an
//! explicit numeric id. Neither depends on the order of [`Mood::ALL`], so
//! the menu can be reordered without touching historical entries.

use std::fmt;
use std::str::FromStr;

macro_rules! moods {
    ($(
        $variant:ident = $id:literal, $tag:literal, $name:literal,
        $emoji:literal;
    )*) => {
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Mood {
            $( $variant = $id, )*
        }

        impl Mood {
            /// All moods, in the order they are shown in the menu.
            pub const ALL: &'static [Self] = &[$( Self::$variant, )*];

            /// Tag stored in the database and used in callback data.
            pub const fn tag(self) -> &'static str {
                match self { $( Self::$variant => $tag, )* }
            }

            pub const fn name(self) -> &'static str {
                match self { $( Self::$variant => $name, )* }
            }

            pub const fn emoji(self) -> &'static str {
                match self { $( Self::$variant => $emoji, )* }
            }

            /// Human-readable label, e.g. `Calm 🙂`.
            pub const fn label(self) -> &'static str {
                match self {
                    $( Self::$variant => concat!($name, " ", $emoji), )*
                }
            }

            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $( $tag => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

moods! {
    Positive = 0, "positive", "Positive", "😊";
    Tired = 1, "tired", "Tired", "😩";
    Sad = 2, "sad", "Sad", "😢";
    Angry = 3, "angry", "Angry", "😠";
    Delighted = 4, "delighted", "Delighted", "🤩";
    Irritated = 5, "irritated", "Irritated", "😖";
    Calm = 6, "calm", "Calm", "🙂";
    Energetic = 7, "energetic", "Energetic", "⚡️";
    Anxious = 8, "anxious", "Anxious", "😰";
    Inspired = 9, "inspired", "Inspired", "🤯";
    Bored = 10, "bored", "Bored", "🫠";
    Loving = 11, "loving", "Loving", "🥰";
    Indifferent = 12, "indifferent", "Indifferent", "🥱";
    Scared = 13, "scared", "Scared", "😱";
    Proud = 14, "proud", "Proud", "😎";
    Envious = 15, "envious", "Envious", "😒";
    Confused = 16, "confused", "Confused", "😓";
    Playful = 17, "playful", "Playful", "😏";
    Focused = 18, "focused", "Focused", "🤔";
    Sick = 19, "sick", "Sick", "🤧";
}

impl Mood {
    /// Category id, as exposed in reports.
    pub const fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mood tag {0:?}")]
pub struct UnknownMood(pub String);

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| UnknownMood(s.to_string()))
    }
}
