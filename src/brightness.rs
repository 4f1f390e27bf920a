/// Bounded brightness multiplier, tracked in hundredths so repeated steps
/// never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brightness(u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessChange {
    Increase,
    Decrease,
    Default,
}

impl Brightness {
    const MIN: u16 = 10;
    const MAX: u16 = 200;
    const DEFAULT: u16 = 100;
    const STEP: u16 = 5;

    pub fn new() -> Self {
        Self(Self::DEFAULT)
    }

    pub fn factor(self) -> f32 {
        f32::from(self.0) / 100.0
    }

    pub fn is_default(self) -> bool {
        self.0 == Self::DEFAULT
    }

    pub fn apply(&mut self, change: BrightnessChange) {
        self.0 = match change {
            BrightnessChange::Increase => (self.0 + Self::STEP).min(Self::MAX),
            BrightnessChange::Decrease => self.0.saturating_sub(Self::STEP).max(Self::MIN),
            BrightnessChange::Default => Self::DEFAULT,
        };
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::new()
    }
}
