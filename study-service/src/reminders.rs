//! Background timers: the daily study reminder and the periodic sync pass.

use crate::dispatcher::Dispatcher;
use crate::notify::{NotificationKind, NotificationReporter};
use crate::study_store::StudyStore;
use chrono::{Local, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DAILY_REMINDER_MESSAGE: &str = "Time for your daily study session! 📚";

const FALLBACK_TIME: (u32, u32) = (9, 0);

fn fallback_time() -> NaiveTime {
    NaiveTime::from_hms_opt(FALLBACK_TIME.0, FALLBACK_TIME.1, 0).unwrap_or(NaiveTime::MIN)
}

/// Parse `HH:MM`; anything invalid means 09:00
pub fn parse_reminder_time(value: Option<&str>) -> NaiveTime {
    let parsed = value.and_then(|s| {
        let (hours, minutes) = s.trim().split_once(':')?;
        let hours: u32 = hours.trim().parse().ok()?;
        let minutes: u32 = minutes.trim().parse().ok()?;
        NaiveTime::from_hms_opt(hours, minutes, 0)
    });

    parsed.unwrap_or_else(|| {
        warn!("Invalid reminder time {:?}, defaulting to 09:00", value);
        fallback_time()
    })
}

/// Next time `at` occurs strictly after `now`: today, or tomorrow if already passed
pub fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today <= now {
        today + chrono::Duration::days(1)
    } else {
        today
    }
}

/// How long to wait from now until the next reminder at `time`
pub fn until_next_reminder(time: Option<&str>) -> Duration {
    let now = Local::now().naive_local();
    let next = next_occurrence(parse_reminder_time(time), now);
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// Sleep until `settings.reminderTime` each day and post a reminder notice
/// while `settings.dailyReminder` is on
pub fn spawn_daily_reminder(store: StudyStore, notifier: NotificationReporter) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let settings = match store.get_settings().await {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Failed to read settings for reminder: {}", e);
                    Value::Null
                }
            };
            let wait = until_next_reminder(settings.get("reminderTime").and_then(Value::as_str));
            debug!("Next daily reminder in {:?}", wait);
            tokio::time::sleep(wait).await;

            // Settings may have changed while sleeping
            let enabled = match store.get_settings().await {
                Ok(settings) => settings
                    .get("dailyReminder")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                Err(e) => {
                    warn!("Failed to read settings for reminder: {}", e);
                    false
                }
            };
            if enabled {
                notifier.notify(DAILY_REMINDER_MESSAGE, NotificationKind::Reminder);
            }
        }
    })
}

/// Drain the sync queue every `period`
pub fn spawn_sync_reminder(dispatcher: Arc<Dispatcher>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let drained = dispatcher.process_sync_queue().await;
            if drained > 0 {
                info!("Sync reminder drained {} queued items", drained);
            }
        }
    })
}
