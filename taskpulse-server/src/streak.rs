//! Login streak updater
//!
//! Runs synchronously on every successful sign-in. The first sign-in of a
//! calendar day credits the streak; later sign-ins the same day are no-ops.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use taskpulse_common::cache::TtlCache;
use taskpulse_common::db::User;
use taskpulse_common::events::{LoginPayload, Notifier, PushMessage};
use taskpulse_common::time::{calendar_day, days_between};
use taskpulse_common::Result;
use tracing::{debug, error, info, warn};

use crate::attendance::ATTENDANCE_CACHE_PREFIX;
use crate::store::UserRepo;

/// How a sign-in affects the login streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoginCredit {
    /// Already credited earlier the same calendar day
    AlreadyCredited,
    /// First sign-in ever
    FirstLogin,
    /// Signed in on the previous calendar day
    Continued,
    /// At least one calendar day was missed
    Reset { missed_days: i64 },
    /// The stored last login lies on a later day than now
    ClockSkew { days: i64 },
}

impl LoginCredit {
    /// Streak after applying this credit, or None when nothing is written
    pub fn next_streak(&self, current: i64) -> Option<i64> {
        match self {
            LoginCredit::FirstLogin | LoginCredit::Reset { .. } => Some(1),
            LoginCredit::Continued => Some(current.max(0) + 1),
            LoginCredit::AlreadyCredited | LoginCredit::ClockSkew { .. } => None,
        }
    }
}

/// Classify a sign-in at `now` given the previous login time
pub fn evaluate_login(
    last_login: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: &FixedOffset,
) -> LoginCredit {
    let Some(last_login) = last_login else {
        return LoginCredit::FirstLogin;
    };

    let today = calendar_day(now, tz);
    let last_day = calendar_day(last_login, tz);
    match days_between(last_day, today) {
        0 => LoginCredit::AlreadyCredited,
        1 => LoginCredit::Continued,
        days if days > 1 => LoginCredit::Reset {
            missed_days: days - 1,
        },
        days => LoginCredit::ClockSkew { days },
    }
}

/// Result of recording one sign-in
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub credit: LoginCredit,
    pub user: User,
}

#[derive(Clone)]
pub struct LoginService {
    users: UserRepo,
    notifier: Arc<dyn Notifier>,
    cache: Arc<TtlCache<serde_json::Value>>,
    tz: FixedOffset,
}

impl LoginService {
    pub fn new(
        users: UserRepo,
        notifier: Arc<dyn Notifier>,
        cache: Arc<TtlCache<serde_json::Value>>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            users,
            notifier,
            cache,
            tz,
        }
    }

    /// Apply the streak rules for a sign-in of `user_id` at `now`
    ///
    /// Only a failure to load the user is returned as an error; a lost update
    /// race or a failed admin push leaves the sign-in successful.
    pub async fn record_login(&self, user_id: &str, now: DateTime<Utc>) -> Result<LoginOutcome> {
        let mut user = self.users.get(user_id).await?;
        let credit = evaluate_login(user.last_login_date, now, &self.tz);

        let Some(streak) = credit.next_streak(user.login_streak) else {
            if let LoginCredit::ClockSkew { days } = credit {
                warn!(
                    "Last login of user {} is {} day(s) ahead of now; streak left unchanged",
                    user.id, -days
                );
            } else {
                debug!("User {} already credited today", user.id);
            }
            return Ok(LoginOutcome { credit, user });
        };

        let written = self
            .users
            .update_login(&user.id, user.last_login_date, now, streak)
            .await?;
        if !written {
            // A concurrent sign-in credited first; report its state
            debug!("Concurrent sign-in already credited user {}", user.id);
            let user = self.users.get(user_id).await?;
            return Ok(LoginOutcome {
                credit: LoginCredit::AlreadyCredited,
                user,
            });
        }

        user.last_login_date = Some(now);
        user.login_streak = streak;
        info!("User {} signed in ({:?}), streak {}", user.id, credit, streak);

        self.cache.invalidate_by_prefix(ATTENDANCE_CACHE_PREFIX);
        self.notify_admins(&user, now).await;

        Ok(LoginOutcome { credit, user })
    }

    async fn notify_admins(&self, user: &User, now: DateTime<Utc>) {
        let admins = match self.users.admin_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Could not load admins for login notice of {}: {}", user.id, e);
                return;
            }
        };

        let payload = LoginPayload {
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            login_time: now,
            login_streak: user.login_streak,
        };
        for admin in &admins {
            self.notifier
                .push_to_user(admin, PushMessage::UserLogin(payload.clone()));
        }
    }
}
