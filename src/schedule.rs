use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{BlackoutConfig, TimeOfDay};
use crate::events::Message;

pub const DEFAULT_POLL: Duration = Duration::from_secs(60);

/// Nightly dark window `[start, end)`. A window whose end is earlier than its
/// start wraps across midnight; equal endpoints describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackoutWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl BlackoutWindow {
    pub fn contains(&self, now: TimeOfDay) -> bool {
        let (start, end, now) = (self.start, self.end, now);
        if start < end {
            start <= now && now < end
        } else if start > end {
            now >= start || now < end
        } else {
            false
        }
    }

    /// Whole minutes until the window closes, or zero when outside it.
    pub fn remaining(&self, now: TimeOfDay) -> u16 {
        if !self.contains(now) {
            return 0;
        }
        let day = TimeOfDay::MINUTES_PER_DAY;
        (self.end.minutes() + day - now.minutes()) % day
    }
}

/// Remembers whether the frame is currently dark so only edges produce
/// messages.
#[derive(Debug, Default)]
pub struct BlackoutLatch {
    in_blackout: bool,
}

impl BlackoutLatch {
    pub fn in_blackout(&self) -> bool {
        self.in_blackout
    }

    pub fn update(&mut self, in_window: bool) -> Option<Message> {
        match (self.in_blackout, in_window) {
            (false, true) => {
                self.in_blackout = true;
                Some(Message::BlackoutScheduleStart)
            }
            (true, false) => {
                self.in_blackout = false;
                Some(Message::BlackoutScheduleEnd)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlackoutSchedule {
    pub window: BlackoutWindow,
    pub timezone: Option<Tz>,
    pub poll: Duration,
}

impl BlackoutSchedule {
    pub fn from_config(cfg: &BlackoutConfig) -> Self {
        Self {
            window: BlackoutWindow {
                start: cfg.start,
                end: cfg.end,
            },
            timezone: cfg.timezone,
            poll: DEFAULT_POLL,
        }
    }

    fn now(&self) -> TimeOfDay {
        match self.timezone {
            Some(tz) => TimeOfDay::from_time(Utc::now().with_timezone(&tz)),
            None => TimeOfDay::from_time(Local::now()),
        }
    }
}

pub async fn run(
    schedule: BlackoutSchedule,
    out: mpsc::Sender<Message>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut latch = BlackoutLatch::default();
    info!(
        start = %schedule.window.start,
        end = %schedule.window.end,
        timezone = ?schedule.timezone,
        "blackout schedule active"
    );

    loop {
        let now = schedule.now();
        let in_window = schedule.window.contains(now);
        if let Some(msg) = latch.update(in_window) {
            info!(
                %now,
                remaining_minutes = schedule.window.remaining(now),
                message = ?msg,
                "blackout edge"
            );
            out.send(msg)
                .await
                .context("failed to send blackout message")?;
        } else {
            debug!(%now, in_window, "blackout poll; no change");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(schedule.poll) => {}
        }
    }

    Ok(())
}
