use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{Message, TimerCommand};

#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    pub interval: Duration,
    pub step: Duration,
}

/// New interval after a key press. Decreasing stops at one step.
pub fn adjust_interval(current: Duration, step: Duration, command: TimerCommand) -> Duration {
    match command {
        TimerCommand::IncreaseInterval => current.saturating_add(step),
        TimerCommand::DecreaseInterval if current > step => (current - step).max(step),
        TimerCommand::DecreaseInterval => current,
    }
}

/// Emits `NextImageTimer` once per interval. Interval changes take effect
/// from the next tick.
pub async fn run(
    settings: TimerSettings,
    out: Sender<Message>,
    mut control: Receiver<TimerCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut interval = settings.interval;
    let mut control_open = true;
    info!(interval_ms = interval.as_millis() as u64, "timer started");

    loop {
        let tick = sleep(interval);
        tokio::pin!(tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = &mut tick => break,
                cmd = control.recv(), if control_open => match cmd {
                    Some(cmd) => {
                        interval = adjust_interval(interval, settings.step, cmd);
                        info!(command = ?cmd, interval_ms = interval.as_millis() as u64, "display interval changed");
                    }
                    None => control_open = false,
                },
            }
        }

        if out.send(Message::NextImageTimer).await.is_err() {
            debug!("coordinator gone; timer stopping");
            break;
        }
    }

    Ok(())
}
