pub mod snapshot;

use std::sync::Arc;

use crate::config::Dimensions;
use crate::error::Error;
use crate::source::Bitmap;

/// Callback a surface invokes for every captured key press.
pub type KeySink = Arc<dyn Fn(char) + Send + Sync>;

/// Size and mode a surface is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub size: Dimensions,
    pub fullscreen: bool,
}

/// Output owned exclusively by the coordinator.
pub trait DisplaySurface: Send {
    /// `None` renders a blank (black) frame.
    fn show(&mut self, bitmap: Option<&Bitmap>) -> Result<(), Error>;

    /// Terminal error frame shown right before a fatal exit.
    fn show_error(&mut self, message: &str) -> Result<(), Error>;

    fn dimensions(&self) -> Dimensions;

    fn resize(&mut self, size: Dimensions) -> Result<(), Error>;

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), Error>;

    fn on_key(&mut self, sink: KeySink);

    /// Release the underlying output. The surface is not used afterwards.
    fn close(&mut self);
}

/// Builds surfaces. Geometry changes tear the old surface down and build a
/// new one instead of resizing in place.
pub trait SurfaceFactory: Send {
    type Surface: DisplaySurface;

    fn create(&mut self, geometry: &Geometry) -> Result<Self::Surface, Error>;

    /// Size used when a surface goes fullscreen.
    fn screen_size(&self) -> Dimensions;
}
