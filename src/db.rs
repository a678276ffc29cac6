//! Storage accessor: every query the bot runs against its SQLite database.

use chrono::NaiveDateTime;
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, QueryResult, RunQueryDsl,
    SqliteConnection,
};
use diesel_derive_newtype::DieselNewType;
use diesel_migrations::{
    embed_migrations, EmbeddedMigrations, MigrationHarness,
};
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

use crate::mood::Mood;
use crate::{models, schema};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

macro_rules! make_db_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(
            Copy,
            Clone,
            Debug,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            Serialize,
            Deserialize,
            DieselNewType,
        )]
        /// A newtype wrapper for a Telegram type to be stored in the database.
        pub struct $name($inner);
    };
}

make_db_newtype!(DbUserId, i64);

impl From<UserId> for DbUserId {
    fn from(id: UserId) -> Self {
        Self(id.0.try_into().expect("UserId is too big"))
    }
}

impl From<DbUserId> for UserId {
    fn from(id: DbUserId) -> Self {
        Self(id.0.try_into().expect("DbUserId is negative"))
    }
}

/// Create the schema if it does not exist yet.
pub fn run_migrations(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
    for version in applied {
        log::info!("Applied migration {version}");
    }
    Ok(())
}

pub fn add_mood(
    conn: &mut SqliteConnection,
    user_id: UserId,
    mood: Mood,
    recorded_at: NaiveDateTime,
) -> QueryResult<()> {
    diesel::insert_into(schema::moods::table)
        .values(models::NewMoodEntry {
            user_id: user_id.into(),
            mood: mood.tag(),
            label: mood.label(),
            recorded_at,
        })
        .execute(conn)
        .map(|_| ())
}

/// All entries of all users, oldest first.
pub fn all_moods(
    conn: &mut SqliteConnection,
) -> QueryResult<Vec<models::MoodEntry>> {
    schema::moods::table.order(schema::moods::id.asc()).load(conn)
}

/// Latest `limit` entries of a user, newest first.
pub fn recent_moods(
    conn: &mut SqliteConnection,
    user_id: UserId,
    limit: i64,
) -> QueryResult<Vec<models::MoodEntry>> {
    schema::moods::table
        .filter(schema::moods::user_id.eq(DbUserId::from(user_id)))
        .order((
            schema::moods::recorded_at.desc(),
            schema::moods::id.desc(),
        ))
        .limit(limit)
        .load(conn)
}

pub fn count_moods(conn: &mut SqliteConnection) -> QueryResult<i64> {
    schema::moods::table.count().get_result(conn)
}

/// Insert or update the daily reminder time, keeping the offset.
pub fn set_notification_time(
    conn: &mut SqliteConnection,
    user_id: UserId,
    time: &str,
) -> QueryResult<()> {
    use schema::users::dsl as u;
    diesel::insert_into(u::users)
        .values(models::NotificationSetting {
            user_id: user_id.into(),
            notification_time: Some(time.to_string()),
            utc_offset: 0,
        })
        .on_conflict(u::user_id)
        .do_update()
        .set(u::notification_time.eq(Some(time)))
        .execute(conn)
        .map(|_| ())
}

/// Insert or update the offset, keeping the reminder time.
pub fn set_utc_offset(
    conn: &mut SqliteConnection,
    user_id: UserId,
    offset: i32,
) -> QueryResult<()> {
    use schema::users::dsl as u;
    diesel::insert_into(u::users)
        .values(models::NotificationSetting {
            user_id: user_id.into(),
            notification_time: None,
            utc_offset: offset,
        })
        .on_conflict(u::user_id)
        .do_update()
        .set(u::utc_offset.eq(offset))
        .execute(conn)
        .map(|_| ())
}

pub fn clear_notification_time(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> QueryResult<()> {
    use schema::users::dsl as u;
    diesel::update(u::users.filter(u::user_id.eq(DbUserId::from(user_id))))
        .set(u::notification_time.eq(None::<String>))
        .execute(conn)
        .map(|_| ())
}

/// Clear the reminder only if it is still set to `time`. Returns whether a
/// row was changed.
pub fn clear_notification_time_if(
    conn: &mut SqliteConnection,
    user_id: UserId,
    time: &str,
) -> QueryResult<bool> {
    use schema::users::dsl as u;
    diesel::update(
        u::users
            .filter(u::user_id.eq(DbUserId::from(user_id)))
            .filter(u::notification_time.eq(time)),
    )
    .set(u::notification_time.eq(None::<String>))
    .execute(conn)
    .map(|rows| rows > 0)
}

pub fn utc_offset(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> QueryResult<Option<i32>> {
    use schema::users::dsl as u;
    u::users
        .filter(u::user_id.eq(DbUserId::from(user_id)))
        .select(u::utc_offset)
        .first(conn)
        .optional()
}

pub fn notification_setting(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> QueryResult<Option<models::NotificationSetting>> {
    use schema::users::dsl as u;
    u::users
        .filter(u::user_id.eq(DbUserId::from(user_id)))
        .first(conn)
        .optional()
}

pub fn has_user(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> QueryResult<bool> {
    use schema::users::dsl as u;
    diesel::select(diesel::dsl::exists(
        u::users.filter(u::user_id.eq(DbUserId::from(user_id))),
    ))
    .get_result(conn)
}

pub fn user_ids(conn: &mut SqliteConnection) -> QueryResult<Vec<UserId>> {
    use schema::users::dsl as u;
    let ids: Vec<DbUserId> =
        u::users.select(u::user_id).order(u::user_id.asc()).load(conn)?;
    Ok(ids.into_iter().map(UserId::from).collect())
}

/// Settings that have a reminder time, used to restore jobs on startup.
pub fn scheduled_settings(
    conn: &mut SqliteConnection,
) -> QueryResult<Vec<models::NotificationSetting>> {
    use schema::users::dsl as u;
    u::users
        .filter(u::notification_time.is_not_null())
        .order(u::user_id.asc())
        .load(conn)
}

#[cfg(test)]
pub fn test_connection() -> SqliteConnection {
    use diesel::Connection;

    let mut conn = SqliteConnection::establish(":memory:").unwrap();
    run_migrations(&mut conn).unwrap();
    conn
}
