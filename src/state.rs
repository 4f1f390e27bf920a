use crate::events::Message;

/// Display mode of the frame. Exactly one is active at a time and only the
/// coordinator mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Normal,
    Blackout,
    MotionBlackout,
    KeyboardHold,
    KeyboardBlackout,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Normal,
        Mode::Blackout,
        Mode::MotionBlackout,
        Mode::KeyboardHold,
        Mode::KeyboardBlackout,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: Mode,
    pub to: Mode,
}

/// The transition table. `None` means the message is not recognised while in
/// `mode` and leaves the mode untouched.
pub fn target(mode: Mode, message: Message) -> Option<Mode> {
    use Message as M;
    use Mode::*;
    match (mode, message) {
        (Normal, M::Hold) => Some(KeyboardHold),
        (Normal, M::BlackoutKeyboard) => Some(KeyboardBlackout),
        (Normal, M::BlackoutScheduleStart) => Some(Blackout),
        (Normal, M::MotionTimeout) => Some(MotionBlackout),

        (Blackout, M::Hold) => Some(KeyboardHold),
        (Blackout, M::BlackoutKeyboard) => Some(Normal),
        (Blackout, M::BlackoutScheduleEnd) => Some(Normal),

        (MotionBlackout, M::Hold) => Some(KeyboardHold),
        (MotionBlackout, M::MotionDetected) => Some(Normal),
        (MotionBlackout, M::ToggleMotionSensor) => Some(Normal),

        (KeyboardBlackout, M::Hold) => Some(KeyboardHold),
        (KeyboardBlackout, M::BlackoutKeyboard) => Some(Normal),

        (KeyboardHold, M::Hold) => Some(Normal),

        _ => None,
    }
}

/// Total over every `(mode, message)` pair.
pub fn transition(mode: Mode, message: Message) -> Mode {
    target(mode, message).unwrap_or(mode)
}

pub struct StateMachine {
    mode: Mode,
    previous: Mode,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::starting_in(Mode::Normal)
    }

    pub fn starting_in(mode: Mode) -> Self {
        Self {
            mode,
            previous: mode,
        }
    }

    pub fn current(&self) -> Mode {
        self.mode
    }

    pub fn previous(&self) -> Mode {
        self.previous
    }

    pub fn apply(&mut self, message: Message) -> Option<ModeChange> {
        let to = target(self.mode, message)?;
        if to == self.mode {
            return None;
        }
        let change = ModeChange {
            from: self.mode,
            to,
        };
        self.previous = self.mode;
        self.mode = to;
        Some(change)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTED: &[(Mode, Message, Mode)] = &[
        (Mode::Normal, Message::Hold, Mode::KeyboardHold),
        (Mode::Normal, Message::BlackoutKeyboard, Mode::KeyboardBlackout),
        (Mode::Normal, Message::BlackoutScheduleStart, Mode::Blackout),
        (Mode::Normal, Message::MotionTimeout, Mode::MotionBlackout),
        (Mode::Blackout, Message::Hold, Mode::KeyboardHold),
        (Mode::Blackout, Message::BlackoutKeyboard, Mode::Normal),
        (Mode::Blackout, Message::BlackoutScheduleEnd, Mode::Normal),
        (Mode::MotionBlackout, Message::Hold, Mode::KeyboardHold),
        (Mode::MotionBlackout, Message::MotionDetected, Mode::Normal),
        (Mode::MotionBlackout, Message::ToggleMotionSensor, Mode::Normal),
        (Mode::KeyboardBlackout, Message::Hold, Mode::KeyboardHold),
        (Mode::KeyboardBlackout, Message::BlackoutKeyboard, Mode::Normal),
        (Mode::KeyboardHold, Message::Hold, Mode::Normal),
    ];

    #[test]
    fn listed_transitions_match_table() {
        for &(from, msg, to) in LISTED {
            assert_eq!(transition(from, msg), to, "{from:?} + {msg:?}");
        }
    }

    #[test]
    fn unlisted_pairs_are_no_ops() {
        for mode in Mode::ALL {
            for msg in Message::ALL {
                if LISTED.iter().any(|&(m, k, _)| m == mode && k == msg) {
                    continue;
                }
                assert_eq!(transition(mode, msg), mode, "{mode:?} + {msg:?}");
                assert!(target(mode, msg).is_none());
            }
        }
    }

    #[test]
    fn hold_from_hold_returns_to_normal_once() {
        let mut sm = StateMachine::starting_in(Mode::KeyboardHold);
        let change = sm.apply(Message::Hold).unwrap();
        assert_eq!((change.from, change.to), (Mode::KeyboardHold, Mode::Normal));
        assert_eq!(sm.previous(), Mode::KeyboardHold);
        // a second hold is a fresh toggle into hold, never a bounce back out
        sm.apply(Message::Hold).unwrap();
        assert_eq!(sm.current(), Mode::KeyboardHold);
    }

    #[test]
    fn every_special_mode_exits_through_normal_or_hold() {
        for mode in Mode::ALL {
            for msg in Message::ALL {
                if let Some(to) = target(mode, msg) {
                    if mode != Mode::Normal {
                        assert!(
                            matches!(to, Mode::Normal | Mode::KeyboardHold),
                            "{mode:?} + {msg:?} -> {to:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn late_schedule_start_does_not_clobber_hold() {
        let mut sm = StateMachine::new();
        sm.apply(Message::Hold);
        assert!(sm.apply(Message::BlackoutScheduleStart).is_none());
        assert_eq!(sm.current(), Mode::KeyboardHold);
    }
}
