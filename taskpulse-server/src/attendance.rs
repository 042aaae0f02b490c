//! Daily attendance tracker
//!
//! Classifies every non-admin user as present or absent for the current
//! calendar day based on the time of their last sign-in.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use taskpulse_common::cache::TtlCache;
use taskpulse_common::db::{EventType, Role, User};
use taskpulse_common::events::{AttendancePayload, Notifier, PushMessage};
use taskpulse_common::time::{calendar_day, day_name, hours_between};
use taskpulse_common::Result;
use tracing::{debug, error, info};

use crate::store::{EventStore, NewEvent, UserRepo};

/// Cache key prefix for attendance summaries
pub const ATTENDANCE_CACHE_PREFIX: &str = "attendance:";

/// A sign-in within this many hours counts as presence today
pub const PRESENCE_WINDOW_HOURS: f64 = 24.0;

const ABSENCE_MESSAGE: &str = "You were marked absent today. Please log in to maintain your streak!";

/// Counters of one tracker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReport {
    pub present: u32,
    pub absent: u32,
    pub skipped_never_logged_in: u32,
    pub skipped_already_recorded: u32,
    pub failed: u32,
}

enum Mark {
    Present,
    Absent,
    NeverLoggedIn,
    AlreadyRecorded,
}

#[derive(Clone)]
pub struct AttendanceTracker {
    users: UserRepo,
    events: EventStore,
    notifier: Arc<dyn Notifier>,
    cache: Arc<TtlCache<serde_json::Value>>,
    tz: FixedOffset,
}

impl AttendanceTracker {
    pub fn new(
        users: UserRepo,
        events: EventStore,
        notifier: Arc<dyn Notifier>,
        cache: Arc<TtlCache<serde_json::Value>>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            users,
            events,
            notifier,
            cache,
            tz,
        }
    }

    /// Record today's attendance for every user
    ///
    /// Failures for one user are logged and counted; only failing to list
    /// users or admins aborts the run.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<AttendanceReport> {
        let today = calendar_day(now, &self.tz);
        let users = self.users.list_by_role(Role::User).await?;
        let admins = self.users.admin_ids().await?;

        info!("Attendance run for {} ({} user(s))", today, users.len());

        let mut report = AttendanceReport::default();
        for user in &users {
            match self.mark_user(user, &admins, today, now).await {
                Ok(Mark::Present) => report.present += 1,
                Ok(Mark::Absent) => report.absent += 1,
                Ok(Mark::NeverLoggedIn) => report.skipped_never_logged_in += 1,
                Ok(Mark::AlreadyRecorded) => report.skipped_already_recorded += 1,
                Err(e) => {
                    error!("Attendance failed for user {}: {}", user.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.present + report.absent > 0 {
            self.cache.invalidate_by_prefix(ATTENDANCE_CACHE_PREFIX);
        }

        info!(
            "Attendance run complete: {} present, {} absent, {} never logged in, {} already recorded, {} failed",
            report.present,
            report.absent,
            report.skipped_never_logged_in,
            report.skipped_already_recorded,
            report.failed
        );
        Ok(report)
    }

    async fn mark_user(
        &self,
        user: &User,
        admins: &[String],
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Mark> {
        let Some(last_login) = user.last_login_date else {
            debug!("User {} has never logged in", user.id);
            return Ok(Mark::NeverLoggedIn);
        };

        if self.users.has_attendance_for(&user.id, today).await? {
            return Ok(Mark::AlreadyRecorded);
        }

        let day = day_name(today);
        let hours_since = hours_between(last_login, now);

        if hours_since <= PRESENCE_WINDOW_HOURS {
            if !self.users.record_present(&user.id, today, day, now).await? {
                return Ok(Mark::AlreadyRecorded);
            }
            debug!("User {} present ({:.1} h since sign-in)", user.id, hours_since);
            return Ok(Mark::Present);
        }

        let Some(absent_days) = self.users.record_absent(&user.id, today, day, now).await? else {
            return Ok(Mark::AlreadyRecorded);
        };
        debug!("User {} absent ({:.1} h since sign-in)", user.id, hours_since);

        self.announce_absence(user, admins, today, absent_days, now)
            .await;
        Ok(Mark::Absent)
    }

    async fn announce_absence(
        &self,
        user: &User,
        admins: &[String],
        date: NaiveDate,
        absent_days: i64,
        now: DateTime<Utc>,
    ) {
        let day = day_name(date);
        let absent_date = date.format("%Y-%m-%d").to_string();

        if !admins.is_empty() {
            let audit = NewEvent::new(EventType::UserAbsent)
                .actor(user.id.clone())
                .targets(admins.iter().cloned())
                .meta(json!({
                    "userName": user.name,
                    "userEmail": user.email,
                    "absentDate": absent_date,
                    "absentDay": day,
                    "totalAbsentDays": absent_days,
                    "streakBroken": true,
                }));
            self.events.record(audit, now).await;
        }

        let personal = NewEvent::new(EventType::UserAbsent)
            .targets([user.id.clone()])
            .meta(json!({
                "userName": user.name,
                "absentDate": absent_date,
                "absentDay": day,
                "totalAbsentDays": absent_days,
                "message": ABSENCE_MESSAGE,
            }));
        self.events.record(personal, now).await;

        let update = AttendancePayload {
            user_id: user.id.clone(),
            user_name: Some(user.name.clone()),
            status: "absent".to_string(),
            date,
            day: day.to_string(),
            absent_days,
            message: None,
        };
        for admin in admins {
            self.notifier
                .push_to_user(admin, PushMessage::AttendanceUpdate(update.clone()));
        }
        self.notifier.push_to_user(
            &user.id,
            PushMessage::AttendanceUpdate(AttendancePayload {
                message: Some(ABSENCE_MESSAGE.to_string()),
                ..update
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_camel_case() {
        let report = AttendanceReport {
            present: 2,
            absent: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["present"], 2);
        assert_eq!(json["skippedNeverLoggedIn"], 0);
        assert_eq!(json["skippedAlreadyRecorded"], 0);
    }
}
