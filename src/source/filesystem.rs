use std::path::PathBuf;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{FormatSupport, ImageProvider, ImageRef, format_support};
use crate::error::Error;

/// Walks the configured roots and hands out image files one at a time,
/// starting a fresh pass whenever the previous one is exhausted.
pub struct FilesystemSource {
    roots: Vec<PathBuf>,
    shuffle: bool,
    pass: Option<Pass>,
    passes_completed: u64,
}

struct Pass {
    root_index: usize,
    walker: Option<walkdir::IntoIter>,
    yielded: usize,
    /// Pre-collected order when shuffling.
    shuffled: Option<std::vec::IntoIter<PathBuf>>,
}

impl FilesystemSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            shuffle: false,
            pass: None,
            passes_completed: 0,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn passes_completed(&self) -> u64 {
        self.passes_completed
    }

    fn start_pass(&self) -> Pass {
        let shuffled = self.shuffle.then(|| {
            let mut all = Vec::new();
            let mut scan = Pass {
                root_index: 0,
                walker: None,
                yielded: 0,
                shuffled: None,
            };
            while let Some(path) = self.walk_next(&mut scan) {
                all.push(path);
            }
            all.shuffle(&mut rand::rng());
            all.into_iter()
        });
        Pass {
            root_index: 0,
            walker: None,
            yielded: 0,
            shuffled,
        }
    }

    fn walk_next(&self, pass: &mut Pass) -> Option<PathBuf> {
        loop {
            if pass.walker.is_none() {
                let root = self.roots.get(pass.root_index)?;
                pass.root_index += 1;
                pass.walker = Some(
                    WalkDir::new(root)
                        .follow_links(true)
                        .sort_by_file_name()
                        .into_iter(),
                );
            }
            let walker = pass.walker.as_mut()?;
            match walker.next() {
                None => pass.walker = None,
                Some(Err(err)) => warn!("walk error: {err}"),
                Some(Ok(entry)) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    match format_support(entry.file_name()) {
                        FormatSupport::Supported => return Some(entry.into_path()),
                        FormatSupport::Unsupported => {
                            warn!(path = %entry.path().display(), "format not supported on this platform; skipping");
                        }
                        FormatSupport::Unknown => {
                            debug!(path = %entry.path().display(), "not an image; skipping");
                        }
                    }
                }
            }
        }
    }
}

impl ImageProvider for FilesystemSource {
    fn next(&mut self) -> Result<ImageRef, Error> {
        loop {
            let mut pass = match self.pass.take() {
                Some(pass) => pass,
                None => self.start_pass(),
            };
            let next = match pass.shuffled.as_mut() {
                Some(order) => order.next(),
                None => self.walk_next(&mut pass),
            };
            match next {
                Some(path) => {
                    pass.yielded += 1;
                    self.pass = Some(pass);
                    return Ok(ImageRef::new(path));
                }
                None if pass.yielded == 0 => {
                    warn!(roots = ?self.roots, "image pass found nothing");
                    return Err(Error::NoImagesFound);
                }
                None => {
                    self.passes_completed += 1;
                    info!(
                        images = pass.yielded,
                        passes = self.passes_completed,
                        "image pass complete; restarting"
                    );
                }
            }
        }
    }
}
