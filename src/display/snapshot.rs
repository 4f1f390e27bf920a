use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage, imageops};
use tracing::{debug, info, warn};

use super::{DisplaySurface, Geometry, KeySink, SurfaceFactory};
use crate::config::Dimensions;
use crate::error::Error;
use crate::source::Bitmap;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const ERROR_TINT: Rgba<u8> = Rgba([96, 0, 0, 255]);

/// Surface that composes each frame onto a black canvas and publishes it as
/// a PNG file. The file is replaced atomically so readers never observe a
/// partial frame.
pub struct SnapshotSurface {
    output: PathBuf,
    size: Dimensions,
    fullscreen: bool,
    keys: Option<KeySink>,
    frames_written: u64,
}

impl SnapshotSurface {
    pub fn open(output: impl Into<PathBuf>, size: Dimensions) -> Result<Self, Error> {
        let output = output.into();
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        info!(output = %output.display(), width = size.width, height = size.height, "snapshot surface opened");
        Ok(Self {
            output,
            size,
            fullscreen: false,
            keys: None,
            frames_written: 0,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Feed a key into whatever sink is registered.
    pub fn press(&self, key: char) {
        match &self.keys {
            Some(sink) => sink(key),
            None => debug!(key = ?key, "no key sink registered"),
        }
    }

    fn compose(&self, bitmap: Option<&Bitmap>, fill: Rgba<u8>) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(self.size.width, self.size.height, fill);
        if let Some(bitmap) = bitmap {
            match ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(
                bitmap.width,
                bitmap.height,
                bitmap.pixels.as_slice(),
            ) {
                Some(view) => {
                    let left = (i64::from(self.size.width) - i64::from(bitmap.width)) / 2;
                    let top = (i64::from(self.size.height) - i64::from(bitmap.height)) / 2;
                    imageops::overlay(&mut canvas, &view, left, top);
                }
                None => warn!(
                    source = %bitmap.source.display(),
                    "bitmap buffer does not match its dimensions; showing blank"
                ),
            }
        }
        canvas
    }

    fn publish(&mut self, canvas: &RgbaImage) -> Result<(), Error> {
        let tmp = self.output.with_extension("png.tmp");
        canvas
            .save_with_format(&tmp, ImageFormat::Png)
            .map_err(|e| Error::Surface(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.output)?;
        self.frames_written += 1;
        Ok(())
    }
}

impl DisplaySurface for SnapshotSurface {
    fn show(&mut self, bitmap: Option<&Bitmap>) -> Result<(), Error> {
        let canvas = self.compose(bitmap, BLACK);
        self.publish(&canvas)?;
        match bitmap {
            Some(b) => debug!(source = %b.source.display(), "frame published"),
            None => debug!("blank frame published"),
        }
        Ok(())
    }

    fn show_error(&mut self, message: &str) -> Result<(), Error> {
        let canvas = self.compose(None, ERROR_TINT);
        self.publish(&canvas)?;
        fs::write(self.output.with_extension("error.txt"), message)?;
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        self.size
    }

    fn resize(&mut self, size: Dimensions) -> Result<(), Error> {
        if size.width == 0 || size.height == 0 {
            return Err(Error::Surface(format!("invalid surface size {size}")));
        }
        self.size = size;
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), Error> {
        self.fullscreen = fullscreen;
        Ok(())
    }

    fn on_key(&mut self, sink: KeySink) {
        self.keys = Some(sink);
    }

    fn close(&mut self) {
        self.keys = None;
        debug!(output = %self.output.display(), frames = self.frames_written, "snapshot surface closed");
    }
}

pub struct SnapshotFactory {
    output: PathBuf,
    screen: Dimensions,
}

impl SnapshotFactory {
    pub fn new(output: impl Into<PathBuf>, screen: Dimensions) -> Self {
        Self {
            output: output.into(),
            screen,
        }
    }
}

impl SurfaceFactory for SnapshotFactory {
    type Surface = SnapshotSurface;

    fn create(&mut self, geometry: &Geometry) -> Result<SnapshotSurface, Error> {
        let mut surface = SnapshotSurface::open(self.output.clone(), geometry.size)?;
        surface.set_fullscreen(geometry.fullscreen)?;
        Ok(surface)
    }

    fn screen_size(&self) -> Dimensions {
        self.screen
    }
}
