//! Periodic background jobs
//!
//! Each job runs in its own spawned loop. The first tick fires immediately,
//! which gives the start-up run; missed ticks are skipped rather than bunched.

use std::sync::Arc;
use std::time::Duration;
use taskpulse_common::time::now;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::attendance::AttendanceTracker;
use crate::overdue::OverdueScanner;

/// Handles of the running job loops; dropping it leaves them running
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop every job loop
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Start the attendance and overdue loops
pub fn start(
    attendance: Arc<AttendanceTracker>,
    attendance_every: Duration,
    overdue: Arc<OverdueScanner>,
    overdue_every: Duration,
) -> SchedulerHandle {
    info!(
        "Scheduling attendance every {:?} and overdue scan every {:?}",
        attendance_every, overdue_every
    );

    let attendance_task = tokio::spawn(async move {
        let mut tick = interval(attendance_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = attendance.run(now()).await {
                error!("Attendance run aborted: {}", e);
            }
        }
    });

    let overdue_task = tokio::spawn(async move {
        let mut tick = interval(overdue_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = overdue.run(now()).await {
                error!("Overdue scan aborted: {}", e);
            }
        }
    });

    SchedulerHandle {
        tasks: vec![attendance_task, overdue_task],
    }
}
