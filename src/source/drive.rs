use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FormatSupport, ImageProvider, ImageRef, format_support};
use crate::error::Error;

/// Id the drive uses for the top of the tree.
pub const ROOT_ID: &str = "root";

/// Longest stretch a backoff sleeps before looking at the cancel token.
const BACKOFF_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriveError {
    /// Worth retrying (timeouts, rate limits, dropped connections).
    #[error("transient drive error: {0}")]
    Transient(String),
    #[error("drive error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveNode {
    pub id: String,
    pub title: String,
    pub kind: NodeKind,
}

/// The remote tree as seen by the traversal. Implementations talk to the
/// actual drive service.
pub trait DriveClient: Send {
    /// Non-trashed children of `parent_id`.
    fn list_children(&self, parent_id: &str) -> Result<Vec<DriveNode>, DriveError>;

    fn download(&self, id: &str, dest: &Path) -> Result<(), DriveError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    /// Ends a backoff early. The pending transient error is returned.
    pub cancel: CancellationToken,
}

impl RetryPolicy {
    /// Runs `op`, retrying transient failures with exponential backoff.
    /// Runs on a blocking thread, so the wait polls `cancel` in slices.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, DriveError>,
    ) -> Result<T, DriveError> {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(DriveError::Transient(reason)) if attempt < self.attempts => {
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, "transient drive failure: {reason}; retrying");
                    if !self.wait(delay) {
                        debug!(what, "retry abandoned on shutdown");
                        return Err(DriveError::Transient(reason));
                    }
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sleeps for `delay`. Returns `false` as soon as `cancel` fires.
    fn wait(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(BACKOFF_SLICE));
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriveSettings {
    pub root_folder: String,
    pub photos_folder: String,
    pub cache_dir: PathBuf,
    pub max_depth: usize,
    pub retry: RetryPolicy,
}

struct Pending {
    node: DriveNode,
    depth: usize,
    in_photos: bool,
}

/// Depth-first walk of the drive tree. Only images somewhere below the
/// photos folder are downloaded and handed out.
pub struct CloudDriveSource<C> {
    client: C,
    settings: DriveSettings,
    stack: Vec<Pending>,
    visited: HashSet<String>,
    yielded: usize,
    in_pass: bool,
}

impl<C: DriveClient> CloudDriveSource<C> {
    pub fn new(client: C, settings: DriveSettings) -> Result<Self, Error> {
        fs::create_dir_all(&settings.cache_dir)?;
        Ok(Self {
            client,
            settings,
            stack: Vec::new(),
            visited: HashSet::new(),
            yielded: 0,
            in_pass: false,
        })
    }

    fn start_pass(&mut self) -> Result<(), Error> {
        self.stack.clear();
        self.visited.clear();
        self.yielded = 0;
        let top = self
            .settings
            .retry
            .run("list root", || self.client.list_children(ROOT_ID))?;
        for node in top.into_iter().rev() {
            if node.kind == NodeKind::Folder && node.title == self.settings.root_folder {
                let in_photos = node.title == self.settings.photos_folder;
                self.stack.push(Pending {
                    node,
                    depth: 1,
                    in_photos,
                });
            }
        }
        if self.stack.is_empty() {
            warn!(root_folder = %self.settings.root_folder, "root folder not found on drive");
        }
        self.in_pass = true;
        Ok(())
    }

    fn expand(&mut self, folder: &Pending) {
        if folder.depth >= self.settings.max_depth {
            warn!(folder = %folder.node.title, depth = folder.depth, "max depth reached; not descending");
            return;
        }
        let children = match self
            .settings
            .retry
            .run("list folder", || self.client.list_children(&folder.node.id))
        {
            Ok(children) => children,
            Err(err) => {
                warn!(folder = %folder.node.title, "skipping folder: {err}");
                return;
            }
        };
        for child in children.into_iter().rev() {
            let in_photos = folder.in_photos || child.title == self.settings.photos_folder;
            self.stack.push(Pending {
                node: child,
                depth: folder.depth + 1,
                in_photos,
            });
        }
    }

    fn fetch(&self, node: &DriveNode) -> Option<PathBuf> {
        let dest = self.settings.cache_dir.join(cache_name(node));
        match self
            .settings
            .retry
            .run("download", || self.client.download(&node.id, &dest))
        {
            Ok(()) => {
                debug!(title = %node.title, dest = %dest.display(), "downloaded");
                Some(dest)
            }
            Err(err) => {
                warn!(title = %node.title, "download failed: {err}");
                None
            }
        }
    }
}

impl<C: DriveClient> ImageProvider for CloudDriveSource<C> {
    fn next(&mut self) -> Result<ImageRef, Error> {
        loop {
            if !self.in_pass {
                self.start_pass()?;
            }
            let Some(pending) = self.stack.pop() else {
                self.in_pass = false;
                if self.yielded == 0 {
                    return Err(Error::NoImagesFound);
                }
                info!(images = self.yielded, "drive pass complete; restarting");
                continue;
            };
            if !self.visited.insert(pending.node.id.clone()) {
                debug!(id = %pending.node.id, "already visited; skipping");
                continue;
            }
            match pending.node.kind {
                NodeKind::Folder => self.expand(&pending),
                NodeKind::File if pending.in_photos => {
                    match format_support(OsStr::new(&pending.node.title)) {
                        FormatSupport::Supported => {
                            if let Some(path) = self.fetch(&pending.node) {
                                self.yielded += 1;
                                return Ok(ImageRef::new(path));
                            }
                        }
                        FormatSupport::Unsupported => {
                            warn!(title = %pending.node.title, "format not supported on this platform; skipping");
                        }
                        FormatSupport::Unknown => {}
                    }
                }
                NodeKind::File => {}
            }
        }
    }
}

fn cache_name(node: &DriveNode) -> String {
    let safe = |s: &str| {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect::<String>()
    };
    format!("{}-{}", safe(&node.id), safe(&node.title))
}

/// [`DriveClient`] over a locally mounted mirror of the drive. Ids are paths
/// relative to the mirror root.
#[derive(Debug, Clone)]
pub struct MirrorDrive {
    root: PathBuf,
}

impl MirrorDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        if id == ROOT_ID {
            self.root.clone()
        } else {
            self.root.join(id)
        }
    }
}

fn io_to_drive(err: std::io::Error) -> DriveError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
            DriveError::Transient(err.to_string())
        }
        _ => DriveError::Fatal(err.to_string()),
    }
}

impl DriveClient for MirrorDrive {
    fn list_children(&self, parent_id: &str) -> Result<Vec<DriveNode>, DriveError> {
        let dir = self.resolve(parent_id);
        let mut nodes = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_to_drive)? {
            let entry = entry.map_err(io_to_drive)?;
            // follows symlinks, like the filesystem source
            let is_dir = match fs::metadata(entry.path()) {
                Ok(meta) => meta.is_dir(),
                Err(err) => {
                    warn!(path = %entry.path().display(), "skipping unreadable entry: {err}");
                    continue;
                }
            };
            let title = entry.file_name().to_string_lossy().into_owned();
            let id = if parent_id == ROOT_ID {
                title.clone()
            } else {
                format!("{parent_id}/{title}")
            };
            nodes.push(DriveNode {
                id,
                title,
                kind: if is_dir {
                    NodeKind::Folder
                } else {
                    NodeKind::File
                },
            });
        }
        nodes.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(nodes)
    }

    fn download(&self, id: &str, dest: &Path) -> Result<(), DriveError> {
        fs::copy(self.resolve(id), dest).map_err(io_to_drive)?;
        Ok(())
    }
}
