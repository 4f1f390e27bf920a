use std::sync::Arc;

use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::display::KeySink;
use crate::events::{Message, TimerCommand};

/// Where a key press ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Frame(Message),
    Timer(TimerCommand),
}

pub const HELP: &[(&str, &str)] = &[
    ("f", "toggle fullscreen"),
    ("n", "next picture"),
    ("h", "toggle hold on the current picture"),
    ("b", "toggle blackout"),
    ("m", "toggle the motion sensor"),
    ("V / v", "increase / decrease brightness"),
    ("a", "default brightness"),
    ("P / p", "increase / decrease the display interval"),
    ("q / x", "quit"),
];

pub fn lookup(key: char) -> Option<KeyCommand> {
    let command = match key {
        'f' => KeyCommand::Frame(Message::FullscreenToggle),
        'n' => KeyCommand::Frame(Message::NextImageKeyboard),
        'h' => KeyCommand::Frame(Message::Hold),
        'b' => KeyCommand::Frame(Message::BlackoutKeyboard),
        'm' => KeyCommand::Frame(Message::ToggleMotionSensor),
        'V' => KeyCommand::Frame(Message::IncreaseBrightness),
        'v' => KeyCommand::Frame(Message::DecreaseBrightness),
        'a' => KeyCommand::Frame(Message::DefaultBrightness),
        'P' => KeyCommand::Timer(TimerCommand::IncreaseInterval),
        'p' => KeyCommand::Timer(TimerCommand::DecreaseInterval),
        'q' | 'x' => KeyCommand::Frame(Message::Quit),
        _ => return None,
    };
    Some(command)
}

pub fn help_text() -> String {
    let mut out = String::from("picframe keys:\n");
    for (keys, what) in HELP {
        out.push_str(&format!("  {keys:<6} {what}\n"));
    }
    out
}

/// Sends mapped key presses to the coordinator or the timer.
#[derive(Debug, Clone)]
pub struct KeyRouter {
    frame: Sender<Message>,
    timer: Option<Sender<TimerCommand>>,
}

impl KeyRouter {
    pub fn new(frame: Sender<Message>, timer: Option<Sender<TimerCommand>>) -> Self {
        Self { frame, timer }
    }

    pub async fn route(&self, key: char) -> Option<KeyCommand> {
        let command = lookup(key)?;
        info!(key = %key, command = ?command, "key pressed");
        let delivered = match command {
            KeyCommand::Frame(msg) => self.frame.send(msg).await.is_ok(),
            KeyCommand::Timer(cmd) => match &self.timer {
                Some(timer) => timer.send(cmd).await.is_ok(),
                None => false,
            },
        };
        if !delivered {
            warn!(key = %key, "key command dropped; receiver closed");
        }
        Some(command)
    }

    /// Non-blocking variant for callbacks registered on a display surface.
    pub fn try_route(&self, key: char) -> Option<KeyCommand> {
        let command = lookup(key)?;
        info!(key = %key, command = ?command, "key pressed");
        let result = match command {
            KeyCommand::Frame(msg) => self.frame.try_send(msg).map_err(|e| e.to_string()),
            KeyCommand::Timer(cmd) => match &self.timer {
                Some(timer) => timer.try_send(cmd).map_err(|e| e.to_string()),
                None => Err("timer disabled".to_string()),
            },
        };
        if let Err(err) = result {
            warn!(key = %key, "key command dropped: {err}");
        }
        Some(command)
    }

    pub fn sink(self) -> KeySink {
        Arc::new(move |key| {
            if self.try_route(key).is_none() {
                debug!(key = ?key, "unmapped key");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn table_matches_documented_keys() {
        assert_eq!(lookup('f'), Some(KeyCommand::Frame(Message::FullscreenToggle)));
        assert_eq!(lookup('n'), Some(KeyCommand::Frame(Message::NextImageKeyboard)));
        assert_eq!(lookup('h'), Some(KeyCommand::Frame(Message::Hold)));
        assert_eq!(lookup('b'), Some(KeyCommand::Frame(Message::BlackoutKeyboard)));
        assert_eq!(lookup('m'), Some(KeyCommand::Frame(Message::ToggleMotionSensor)));
        assert_eq!(lookup('V'), Some(KeyCommand::Frame(Message::IncreaseBrightness)));
        assert_eq!(lookup('v'), Some(KeyCommand::Frame(Message::DecreaseBrightness)));
        assert_eq!(lookup('a'), Some(KeyCommand::Frame(Message::DefaultBrightness)));
        assert_eq!(lookup('P'), Some(KeyCommand::Timer(TimerCommand::IncreaseInterval)));
        assert_eq!(lookup('p'), Some(KeyCommand::Timer(TimerCommand::DecreaseInterval)));
        assert_eq!(lookup('q'), Some(KeyCommand::Frame(Message::Quit)));
        assert_eq!(lookup('x'), Some(KeyCommand::Frame(Message::Quit)));
        assert_eq!(lookup('z'), None);
        assert_eq!(lookup('N'), None);
    }

    #[test]
    fn sink_routes_timer_keys_to_timer() {
        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let (timer_tx, mut timer_rx) = mpsc::channel(4);
        let sink = KeyRouter::new(frame_tx, Some(timer_tx)).sink();
        sink('P');
        sink('n');
        sink('?');
        assert_eq!(timer_rx.try_recv().ok(), Some(TimerCommand::IncreaseInterval));
        assert_eq!(frame_rx.try_recv().ok(), Some(Message::NextImageKeyboard));
        assert!(frame_rx.try_recv().is_err());
    }
}
