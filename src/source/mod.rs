pub mod drive;
pub mod filesystem;

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::{Dimensions, SourceConfig};
use crate::error::Error;
use crate::render::loader;

/// Local file an image source handed out. For remote sources this is the
/// downloaded copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(PathBuf);

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Decoded RGBA8 image sized for the surface it will be shown on.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub size: Dimensions,
    pub brightness: f32,
}

pub trait ImageProvider: Send {
    /// Next image of a restartable, endless sequence. Fails with
    /// [`Error::NoImagesFound`] when a whole pass yields nothing.
    fn next(&mut self) -> Result<ImageRef, Error>;

    fn resolve(&self, image: &ImageRef, request: &RenderRequest) -> Result<Bitmap, Error> {
        loader::load_bitmap(image.path(), request)
    }
}

impl<P: ImageProvider + ?Sized> ImageProvider for Box<P> {
    fn next(&mut self) -> Result<ImageRef, Error> {
        (**self).next()
    }

    fn resolve(&self, image: &ImageRef, request: &RenderRequest) -> Result<Bitmap, Error> {
        (**self).resolve(image, request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Known image format that this build cannot decode.
    Unsupported,
    Unknown,
}

pub fn format_support(name: &OsStr) -> FormatSupport {
    let ext = Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg" | "png" | "gif" | "webp") => FormatSupport::Supported,
        Some("heic" | "heif" | "avif" | "tif" | "tiff") => FormatSupport::Unsupported,
        _ => FormatSupport::Unknown,
    }
}

/// Opens the configured source. `cancel` cuts cloud-drive retry waits short
/// on shutdown.
pub fn from_config(
    cfg: &SourceConfig,
    cancel: &CancellationToken,
) -> Result<Box<dyn ImageProvider>, Error> {
    match cfg {
        SourceConfig::Filesystem { paths, shuffle } => Ok(Box::new(
            filesystem::FilesystemSource::new(paths.clone()).with_shuffle(*shuffle),
        )),
        SourceConfig::CloudDrive {
            mirror_path,
            root_folder,
            photos_folder,
            cache_dir,
            max_depth,
            retry_attempts,
            retry_delay,
        } => {
            let client = drive::MirrorDrive::new(mirror_path.clone());
            let settings = drive::DriveSettings {
                root_folder: root_folder.clone(),
                photos_folder: photos_folder.clone(),
                cache_dir: cache_dir.clone(),
                max_depth: *max_depth,
                retry: drive::RetryPolicy {
                    attempts: *retry_attempts,
                    base_delay: *retry_delay,
                    cancel: cancel.clone(),
                },
            };
            Ok(Box::new(drive::CloudDriveSource::new(client, settings)?))
        }
    }
}
