use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::db::DbUserId;
use crate::mood::Mood;

// Database models

#[derive(Clone, Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::moods)]
pub struct MoodEntry {
    pub id: i32,
    pub user_id: DbUserId,
    pub mood: String,
    pub label: String,
    pub recorded_at: NaiveDateTime,
}

impl MoodEntry {
    /// `None` for tags that are no longer in the catalogue.
    pub fn category(&self) -> Option<Mood> {
        Mood::from_tag(&self.mood)
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::moods)]
pub struct NewMoodEntry<'a> {
    pub user_id: DbUserId,
    pub mood: &'a str,
    pub label: &'a str,
    pub recorded_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Insertable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
pub struct NotificationSetting {
    pub user_id: DbUserId,
    /// `HH:MM` in the reference timezone.
    pub notification_time: Option<String>,
    pub utc_offset: i32,
}
