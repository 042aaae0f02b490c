//! Overdue task scanner
//!
//! Announces every task that passed its due date without being completed.
//! Each task is announced at most once: the `overdue_notified` latch is
//! claimed before the event is logged and released again if logging fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use taskpulse_common::db::{EventType, Task};
use taskpulse_common::Result;
use tracing::{debug, error, info};

use crate::store::{EventStore, NewEvent, TaskRepo, UserRepo};

/// Counters of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverdueReport {
    pub found: u32,
    pub notified: u32,
    pub failed: u32,
}

#[derive(Clone)]
pub struct OverdueScanner {
    tasks: TaskRepo,
    users: UserRepo,
    events: EventStore,
}

impl OverdueScanner {
    pub fn new(tasks: TaskRepo, users: UserRepo, events: EventStore) -> Self {
        Self {
            tasks,
            users,
            events,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<OverdueReport> {
        let overdue = self.tasks.find_overdue(now).await?;
        let admins = self.users.admin_ids().await?;

        let mut report = OverdueReport {
            found: overdue.len() as u32,
            ..Default::default()
        };

        for task in &overdue {
            match self.announce(task, &admins, now).await {
                Ok(true) => report.notified += 1,
                Ok(false) => debug!("Task {} already announced by another scan", task.id),
                Err(e) => {
                    error!("Overdue notice failed for task {}: {}", task.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Overdue scan complete: {} found, {} notified, {} failed",
            report.found, report.notified, report.failed
        );
        Ok(report)
    }

    /// Returns false when the latch was already taken
    async fn announce(&self, task: &Task, admins: &[String], now: DateTime<Utc>) -> Result<bool> {
        if !self.tasks.claim_overdue_notice(&task.id).await? {
            return Ok(false);
        }

        let event = NewEvent::new(EventType::TaskOverdue)
            .targets(admins.iter().cloned())
            .task(task.id.clone())
            .meta(json!({
                "title": task.title,
                "dueDate": task.due_date,
            }));

        if let Err(e) = self.events.create(event, now).await {
            if let Err(release) = self.tasks.release_overdue_notice(&task.id).await {
                error!("Could not release overdue latch of task {}: {}", task.id, release);
            }
            return Err(e);
        }
        Ok(true)
    }
}
