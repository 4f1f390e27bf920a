/// Everything a producer can ask of the coordinator.
///
/// Messages carry no payload; the variant alone says what happened and, by
/// extension, who produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    NextImageTimer,
    NextImageKeyboard,
    Hold,
    BlackoutKeyboard,
    IncreaseBrightness,
    DecreaseBrightness,
    DefaultBrightness,
    ToggleMotionSensor,
    FullscreenToggle,
    Quit,
    BlackoutScheduleStart,
    BlackoutScheduleEnd,
    MotionDetected,
    MotionTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Timer,
    Keyboard,
    Schedule,
    Motion,
}

impl Message {
    pub const ALL: [Message; 14] = [
        Message::NextImageTimer,
        Message::NextImageKeyboard,
        Message::Hold,
        Message::BlackoutKeyboard,
        Message::IncreaseBrightness,
        Message::DecreaseBrightness,
        Message::DefaultBrightness,
        Message::ToggleMotionSensor,
        Message::FullscreenToggle,
        Message::Quit,
        Message::BlackoutScheduleStart,
        Message::BlackoutScheduleEnd,
        Message::MotionDetected,
        Message::MotionTimeout,
    ];

    pub fn origin(self) -> Origin {
        match self {
            Message::NextImageTimer => Origin::Timer,
            Message::BlackoutScheduleStart | Message::BlackoutScheduleEnd => Origin::Schedule,
            Message::MotionDetected | Message::MotionTimeout => Origin::Motion,
            _ => Origin::Keyboard,
        }
    }
}

/// Side-channel into the timer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    IncreaseInterval,
    DecreaseInterval,
}

/// Side-channel into the motion monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCommand {
    Toggle,
}
