use anyhow::{Context, Result};
use crossterm::terminal;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::Message;
use crate::keymap::{KeyCommand, KeyRouter};

/// Keeps the controlling terminal in raw mode so every key press reaches the
/// listener without Enter. Cooked mode comes back on drop.
pub struct RawTerminal(());

impl RawTerminal {
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to put the terminal in raw mode")?;
        Ok(Self(()))
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Err(err) = terminal::disable_raw_mode() {
            warn!("failed to restore the terminal: {err}");
        }
    }
}

/// Raw mode hands Ctrl-C and Ctrl-D over as bytes instead of signals.
fn translate(key: char) -> char {
    match key {
        '\u{3}' | '\u{4}' => 'q',
        other => other,
    }
}

/// Reads single characters from `input` and routes them through the key
/// table. Returns after a quit key or at end of input.
pub async fn run<R>(mut input: R, router: KeyRouter, cancel: CancellationToken) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = input.read(&mut buf) => read.context("failed to read keyboard input")?,
        };
        if read == 0 {
            debug!("keyboard input closed");
            break;
        }

        let text = String::from_utf8_lossy(&buf[..read]);
        for key in text.chars().filter(|c| !c.is_whitespace()).map(translate) {
            match router.route(key).await {
                Some(KeyCommand::Frame(Message::Quit)) => {
                    info!("quit requested from keyboard");
                    return Ok(());
                }
                Some(_) => {}
                None => debug!(key = ?key, "unmapped key"),
            }
        }
    }
    Ok(())
}
