//! Daily mood reminders, one job per user.
//!
//! Each job is a tokio task that sleeps until the next occurrence of its
//! `cron` schedule in the reference timezone and then asks a
//! [`PromptSender`] to deliver the prompt. Jobs are replaced by removing the
//! old one and spawning a new one, so at most one job per user is active.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::Context;
use chrono::{NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures::future::BoxFuture;
use teloxide::types::UserId;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::timezone::parse_hh_mm;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The user blocked the bot or can't be reached anymore.
    #[error("recipient is unreachable: {0}")]
    Blocked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Delivers the reminder prompt to a user.
pub trait PromptSender: Send + Sync {
    /// `time` is the reference time of the job that fired.
    fn send_prompt(
        &self,
        user_id: UserId,
        time: NaiveTime,
    ) -> BoxFuture<'_, Result<(), DeliveryError>>;
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn for_user(user_id: UserId) -> Self {
        Self(format!("mood_prompt_{user_id}"))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Job {
    time: NaiveTime,
    generation: u64,
    cancel: CancellationToken,
}

pub struct ReminderScheduler {
    tz: Tz,
    sender: Arc<dyn PromptSender>,
    jobs: Mutex<HashMap<JobId, Job>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(
        tz: Tz,
        sender: Arc<dyn PromptSender>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            tz,
            sender,
            jobs: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            shutdown,
        })
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule or reschedule the daily reminder of a user at `time`
    /// (`HH:MM` in the reference timezone). Returns `false` on failure.
    pub fn schedule(self: &Arc<Self>, user_id: UserId, time: &str) -> bool {
        let id = JobId::for_user(user_id);
        match self.try_schedule(user_id, time) {
            Ok(()) => {
                log::info!("Job {id} set to {time} for user {user_id}");
                true
            }
            Err(e) => {
                log::error!("Failed to schedule job {id} at {time:?}: {e:#}");
                false
            }
        }
    }

    fn try_schedule(
        self: &Arc<Self>,
        user_id: UserId,
        time: &str,
    ) -> anyhow::Result<()> {
        let time = parse_hh_mm(time)
            .with_context(|| format!("invalid time format {time:?}"))?;
        let schedule = daily_schedule(time)?;
        let runtime = tokio::runtime::Handle::try_current()
            .context("no tokio runtime")?;

        let id = JobId::for_user(user_id);
        let cancel = self.shutdown.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut jobs = self.jobs();
            if let Some(old) = jobs.remove(&id) {
                old.cancel.cancel();
                log::info!("Old job {id} removed");
            }
            jobs.insert(
                id,
                Job { time, generation, cancel: cancel.clone() },
            );
            crate::metrics::update_scheduled(jobs.len());
        }

        runtime.spawn(run_job(
            Arc::downgrade(self),
            user_id,
            generation,
            schedule,
            self.tz,
            cancel,
        ));
        Ok(())
    }

    /// Remove the reminder of a user. Does nothing if there is none.
    pub fn remove(&self, user_id: UserId) -> bool {
        let id = JobId::for_user(user_id);
        let mut jobs = self.jobs();
        let Some(job) = jobs.remove(&id) else {
            return false;
        };
        job.cancel.cancel();
        crate::metrics::update_scheduled(jobs.len());
        log::info!("Job {id} removed for user {user_id}");
        true
    }

    /// Remove the job only if it was not replaced in the meantime.
    fn remove_generation(&self, user_id: UserId, generation: u64) {
        let id = JobId::for_user(user_id);
        let mut jobs = self.jobs();
        if jobs.get(&id).is_some_and(|job| job.generation == generation) {
            if let Some(job) = jobs.remove(&id) {
                job.cancel.cancel();
            }
            crate::metrics::update_scheduled(jobs.len());
            log::info!("Job {id} removed for user {user_id}");
        }
    }

    /// Time of the active reminder of a user, in the reference timezone.
    pub fn job(&self, user_id: UserId) -> Option<NaiveTime> {
        self.jobs().get(&JobId::for_user(user_id)).map(|job| job.time)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Cancel every job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs().clear();
        crate::metrics::update_scheduled(0);
    }

    /// Deliver one prompt. Returns whether the job should keep running.
    async fn fire(&self, user_id: UserId, generation: u64) -> bool {
        let time = self
            .jobs()
            .get(&JobId::for_user(user_id))
            .filter(|job| job.generation == generation)
            .map(|job| job.time);
        let Some(time) = time else {
            // Replaced or removed while sleeping.
            return false;
        };
        match self.sender.send_prompt(user_id, time).await {
            Ok(()) => {
                log::info!("Sent reminder to user {user_id}");
                crate::metrics::reminder_delivered("success");
                true
            }
            Err(DeliveryError::Blocked(reason)) => {
                crate::metrics::reminder_delivered("blocked");
                self.remove_generation(user_id, generation);
                log::info!(
                    "User {user_id} is unreachable ({reason}), reminder removed"
                );
                false
            }
            Err(DeliveryError::Other(e)) => {
                crate::metrics::reminder_delivered("failure");
                log::error!("Failed to send reminder to user {user_id}: {e:#}");
                true
            }
        }
    }
}

fn daily_schedule(time: NaiveTime) -> anyhow::Result<Schedule> {
    Schedule::from_str(&format!("0 {} {} * * * *", time.minute(), time.hour()))
        .context("failed to parse schedule")
}

async fn run_job(
    scheduler: Weak<ReminderScheduler>,
    user_id: UserId,
    generation: u64,
    schedule: Schedule,
    tz: Tz,
    cancel: CancellationToken,
) {
    let id = JobId::for_user(user_id);
    let mut after = Utc::now().with_timezone(&tz);
    loop {
        let Some(next_run) = schedule.after(&after).next() else {
            log::error!("Job {id}: failed to get next schedule");
            break;
        };
        log::debug!("Job {id}: next execution time {next_run}");
        let wait = (next_run.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default();
        after = next_run;
        select! {
            () = cancel.cancelled() => break,
            () = sleep(wait) => {}
        }

        let Some(scheduler) = scheduler.upgrade() else {
            break;
        };
        if !scheduler.fire(user_id, generation).await {
            break;
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use chrono::NaiveTime;
    use futures::future::BoxFuture;
    use teloxide::types::UserId;
    use tokio::sync::mpsc;

    use super::{DeliveryError, PromptSender};

    /// A [`PromptSender`] that reports deliveries to a channel.
    pub struct RecordingSender {
        pub blocked: bool,
        tx: mpsc::UnboundedSender<UserId>,
        pub sent: Mutex<Vec<UserId>>,
    }

    impl RecordingSender {
        pub fn new(blocked: bool) -> (Self, mpsc::UnboundedReceiver<UserId>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { blocked, tx, sent: Mutex::new(Vec::new()) }, rx)
        }
    }

    impl PromptSender for RecordingSender {
        fn send_prompt(
            &self,
            user_id: UserId,
            _time: NaiveTime,
        ) -> BoxFuture<'_, Result<(), DeliveryError>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(user_id);
                let _ = self.tx.send(user_id);
                if self.blocked {
                    Err(DeliveryError::Blocked(
                        "Forbidden: bot was blocked by the user".to_string(),
                    ))
                } else {
                    Ok(())
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSender;
    use super::*;

    fn new_scheduler(
        blocked: bool,
    ) -> (Arc<ReminderScheduler>, Arc<RecordingSender>) {
        let (sender, _rx) = RecordingSender::new(blocked);
        let sender = Arc::new(sender);
        let scheduler = ReminderScheduler::new(
            chrono_tz::Europe::Moscow,
            Arc::clone(&sender) as Arc<dyn PromptSender>,
            CancellationToken::new(),
        );
        (scheduler, sender)
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn generation(scheduler: &ReminderScheduler, user_id: UserId) -> u64 {
        scheduler.jobs().get(&JobId::for_user(user_id)).unwrap().generation
    }

    #[test]
    fn job_id_is_derived_from_user() {
        assert_eq!(JobId::for_user(UserId(42)).to_string(), "mood_prompt_42");
    }

    #[test]
    fn schedule_without_runtime_fails() {
        let (scheduler, _) = new_scheduler(false);
        assert!(!scheduler.schedule(UserId(1), "10:00"));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn reschedule_replaces_job() {
        let (scheduler, _) = new_scheduler(false);
        assert!(scheduler.schedule(UserId(42), "10:00"));
        assert!(scheduler.schedule(UserId(42), "21:30"));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.job(UserId(42)), Some(hm(21, 30)));
    }

    #[tokio::test]
    async fn invalid_time_is_rejected() {
        let (scheduler, _) = new_scheduler(false);
        assert!(!scheduler.schedule(UserId(42), "25:00"));
        assert!(!scheduler.schedule(UserId(42), "ten"));
        assert_eq!(scheduler.job(UserId(42)), None);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (scheduler, _) = new_scheduler(false);
        assert!(!scheduler.remove(UserId(42)));
        assert!(scheduler.schedule(UserId(42), "10:00"));
        assert!(scheduler.remove(UserId(42)));
        assert!(!scheduler.remove(UserId(42)));
        assert_eq!(scheduler.job(UserId(42)), None);
    }

    #[tokio::test]
    async fn blocked_delivery_removes_job() {
        let (scheduler, sender) = new_scheduler(true);
        assert!(scheduler.schedule(UserId(42), "10:00"));
        assert!(scheduler.schedule(UserId(7), "10:00"));

        let gen = generation(&scheduler, UserId(42));
        assert!(!scheduler.fire(UserId(42), gen).await);
        assert_eq!(scheduler.job(UserId(42)), None);
        assert_eq!(scheduler.job(UserId(7)), Some(hm(10, 0)));
        assert_eq!(*sender.sent.lock().unwrap(), vec![UserId(42)]);
    }

    #[tokio::test]
    async fn stale_job_does_not_deliver() {
        let (scheduler, sender) = new_scheduler(true);
        assert!(scheduler.schedule(UserId(42), "10:00"));
        let old = generation(&scheduler, UserId(42));
        assert!(scheduler.schedule(UserId(42), "11:00"));

        assert!(!scheduler.fire(UserId(42), old).await);
        assert_eq!(scheduler.job(UserId(42)), Some(hm(11, 0)));
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_delivery_keeps_job() {
        let (scheduler, sender) = new_scheduler(false);
        assert!(scheduler.schedule(UserId(42), "10:00"));
        let gen = generation(&scheduler, UserId(42));
        assert!(scheduler.fire(UserId(42), gen).await);
        assert_eq!(scheduler.job(UserId(42)), Some(hm(10, 0)));
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn job_fires_and_unschedules_when_blocked() {
        let (sender, mut rx) = RecordingSender::new(true);
        let scheduler = ReminderScheduler::new(
            chrono_tz::Europe::Moscow,
            Arc::new(sender),
            CancellationToken::new(),
        );
        assert!(scheduler.schedule(UserId(42), "10:00"));

        assert_eq!(rx.recv().await, Some(UserId(42)));
        for _ in 0..100 {
            if scheduler.job(UserId(42)).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.job(UserId(42)), None);
    }

    #[tokio::test]
    async fn shutdown_clears_jobs() {
        let (scheduler, _) = new_scheduler(false);
        assert!(scheduler.schedule(UserId(1), "10:00"));
        assert!(scheduler.schedule(UserId(2), "11:00"));
        scheduler.shutdown();
        assert!(scheduler.is_empty());
    }
}
