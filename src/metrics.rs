use std::path::Path;

use diesel::SqliteConnection;

use crate::mood::Mood;

#[allow(clippy::module_name_repetitions)] // For conistency with other modules.
pub fn register_metrics() {
    // Descriptions of labeled metrics
    metrics::describe_counter!(
        "moodbot_moods_recorded_total",
        "Number of mood entries recorded since the bot start."
    );
    metrics::describe_counter!(
        "moodbot_reminders_total",
        "Number of reminder deliveries, by status."
    );
    metrics::describe_gauge!(
        "moodbot_scheduled_reminders",
        "Number of active daily reminders."
    );

    // Constant metrics

    // moodbot_start_time_seconds
    metrics::describe_gauge!(
        "moodbot_start_time_seconds",
        "Unix timestamp of the bot start time."
    );
    metrics::gauge!(
        "moodbot_start_time_seconds",
        std::time::UNIX_EPOCH.elapsed().unwrap_or_default().as_secs_f64(),
    );

    // moodbot_build_info
    metrics::describe_gauge!(
        "moodbot_build_info",
        "A metric with a constant '1' value with the moodbot build information."
    );
    metrics::gauge!(
        "moodbot_build_info",
        1.0,
        "revision" => crate::version(),
    );
}

/// Refresh some metrics before dumping them.
#[allow(clippy::cast_precision_loss)] // Rounding errors are fine here.
pub fn refresh(conn: &mut SqliteConnection, db_path: &Path) {
    // moodbot_users
    let users = crate::db::user_ids(conn).map(|u| u.len()).unwrap_or_default();
    metrics::describe_gauge!(
        "moodbot_users",
        "Number of users with notification settings."
    );
    metrics::gauge!("moodbot_users", users as f64);

    // moodbot_mood_entries
    let entries = crate::db::count_moods(conn).unwrap_or_default();
    metrics::describe_gauge!(
        "moodbot_mood_entries",
        "Number of stored mood entries."
    );
    metrics::gauge!("moodbot_mood_entries", entries as f64);

    // moodbot_db_size_bytes
    let db_size = std::fs::metadata(db_path)
        .map(|m| m.len())
        .unwrap_or_default() as f64;
    metrics::describe_gauge!(
        "moodbot_db_size_bytes",
        "Size of the database file in bytes."
    );
    metrics::gauge!("moodbot_db_size_bytes", db_size);
}

pub fn mood_recorded(mood: Mood) {
    metrics::increment_counter!(
        "moodbot_moods_recorded_total",
        "mood" => mood.tag(),
    );
}

pub fn reminder_delivered(status: &'static str) {
    metrics::increment_counter!("moodbot_reminders_total", "status" => status);
}

#[allow(clippy::cast_precision_loss)]
pub fn update_scheduled(count: usize) {
    metrics::gauge!("moodbot_scheduled_reminders", count as f64);
}
