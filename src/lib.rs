pub mod brightness;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod keymap;
pub mod schedule;
pub mod source;
pub mod state;
pub mod render {
    pub mod loader;
}
pub mod tasks {
    pub mod coordinator;
    pub mod keyboard;
    pub mod motion;
    pub mod timer;
}
