use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MotionConfig;
use crate::error::Error;
use crate::events::{Message, MotionCommand};

/// Sampling grid spacing in pixels.
const MESH: u32 = 10;
/// Grey-level difference that marks a sampled pixel as changed.
const LUMA_THRESHOLD: u8 = 50;
/// Consecutive failed grabs before the monitor gives up on the camera.
const MAX_GRAB_FAILURES: u32 = 50;

/// 8-bit greyscale frame. The buffer always holds `width * height` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

impl GrayFrame {
    /// Rejects buffers that do not match the stated size.
    pub fn new(width: u32, height: u32, luma: Vec<u8>) -> Result<Self, Error> {
        let expected = (width as usize).checked_mul(height as usize);
        if expected != Some(luma.len()) {
            return Err(Error::FrameSize {
                width,
                height,
                len: luma.len(),
            });
        }
        Ok(Self { width, height, luma })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    fn at(&self, x: u32, y: u32) -> u8 {
        self.luma[y as usize * self.width as usize + x as usize]
    }
}

/// A camera, or anything else that produces frames. `grab` may block; the
/// monitor calls it from the blocking pool.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<GrayFrame, Error>;
}

/// Reads `<dir>/camera-<port>.jpg`, which an external capture process keeps
/// overwriting with the latest camera frame.
pub struct SnapshotCamera {
    port: u32,
    path: PathBuf,
}

impl SnapshotCamera {
    pub fn open(dir: impl Into<PathBuf>, port: u32) -> Result<Self, Error> {
        let path = dir.into().join(format!("camera-{port}.jpg"));
        if !path.is_file() {
            return Err(Error::CameraUnavailable {
                port,
                reason: format!("no frames at {}", path.display()),
            });
        }
        Ok(Self { port, path })
    }
}

impl FrameSource for SnapshotCamera {
    fn grab(&mut self) -> Result<GrayFrame, Error> {
        let img = image::open(&self.path)
            .map_err(|e| Error::CameraUnavailable {
                port: self.port,
                reason: e.to_string(),
            })?
            .to_luma8();
        let (width, height) = img.dimensions();
        GrayFrame::new(width, height, img.into_raw())
    }
}

/// Number of sampled pixels whose grey level differs by more than the
/// threshold. Frames of different sizes count every sample as changed.
pub fn changed_pixels(a: &GrayFrame, b: &GrayFrame) -> usize {
    let samples = |f: &GrayFrame| (f.width.div_ceil(MESH) * f.height.div_ceil(MESH)) as usize;
    if a.width != b.width || a.height != b.height {
        return samples(b);
    }
    let mut changed = 0;
    for y in (0..a.height).step_by(MESH as usize) {
        for x in (0..a.width).step_by(MESH as usize) {
            if a.at(x, y).abs_diff(b.at(x, y)) > LUMA_THRESHOLD {
                changed += 1;
            }
        }
    }
    changed
}

/// Keeps the last two frames. A new frame counts as motion only when all
/// three pairwise comparisons exceed the threshold, which filters out the
/// occasional corrupt frame.
pub struct FrameWindow {
    older: GrayFrame,
    old: GrayFrame,
    threshold: usize,
}

impl FrameWindow {
    pub fn new(seed: GrayFrame, threshold: usize) -> Self {
        Self {
            older: seed.clone(),
            old: seed,
            threshold,
        }
    }

    pub fn push(&mut self, frame: GrayFrame) -> bool {
        let moved = changed_pixels(&self.older, &self.old) > self.threshold
            && changed_pixels(&self.older, &frame) > self.threshold
            && changed_pixels(&self.old, &frame) > self.threshold;
        self.older = std::mem::replace(&mut self.old, frame);
        moved
    }
}

/// Turns motion observations into latched edge messages.
#[derive(Debug)]
pub struct MotionTracker {
    timeout: Duration,
    last_motion: Instant,
    in_timeout: bool,
}

impl MotionTracker {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_motion: now,
            in_timeout: false,
        }
    }

    pub fn in_timeout(&self) -> bool {
        self.in_timeout
    }

    pub fn observe(&mut self, moved: bool, now: Instant) -> Option<Message> {
        if moved {
            self.last_motion = now;
            if self.in_timeout {
                self.in_timeout = false;
                return Some(Message::MotionDetected);
            }
        }
        if !self.in_timeout && now.duration_since(self.last_motion) > self.timeout {
            self.in_timeout = true;
            return Some(Message::MotionTimeout);
        }
        None
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_motion = now;
        self.in_timeout = false;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MotionSettings {
    pub timeout: Duration,
    pub pixel_threshold: usize,
    pub enabled: bool,
    /// Frames discarded while the camera adjusts to the light.
    pub ramp_frames: u32,
    /// Pause between samples while the room is still.
    pub scan_interval: Duration,
    /// Pause between samples while motion is present.
    pub presence_interval: Duration,
}

impl MotionSettings {
    pub fn from_config(cfg: &MotionConfig, timeout: Duration) -> Self {
        Self {
            timeout,
            pixel_threshold: cfg.pixel_threshold,
            enabled: cfg.enabled,
            ramp_frames: 40,
            scan_interval: Duration::from_millis(200),
            presence_interval: Duration::from_millis(25),
        }
    }
}

/// Grabs one frame on the blocking pool. The camera travels to the worker
/// thread and back.
async fn grab<S: FrameSource + 'static>(mut camera: S) -> Result<(S, Result<GrayFrame, Error>)> {
    tokio::task::spawn_blocking(move || {
        let frame = camera.grab();
        (camera, frame)
    })
    .await
    .context("camera grab worker failed")
}

pub async fn run<S: FrameSource + 'static>(
    mut camera: S,
    settings: MotionSettings,
    out: Sender<Message>,
    mut control: Receiver<MotionCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut seed = None;
    for _ in 0..settings.ramp_frames.max(1) {
        let (back, frame) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            grabbed = grab(camera) => grabbed?,
        };
        camera = back;
        match frame {
            Ok(frame) => seed = Some(frame),
            Err(err) => debug!("ramp frame failed: {err}"),
        }
    }
    let Some(seed) = seed else {
        warn!("camera produced no frames; motion monitor disabled");
        return Ok(());
    };

    let mut window = FrameWindow::new(seed, settings.pixel_threshold);
    let mut tracker = MotionTracker::new(settings.timeout, Instant::now());
    let mut enabled = settings.enabled;
    let mut delay = settings.scan_interval;
    let mut control_open = true;
    let mut failures = 0u32;
    info!(
        timeout_secs = settings.timeout.as_secs(),
        threshold = settings.pixel_threshold,
        enabled,
        "motion monitor started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = control.recv(), if control_open => {
                match cmd {
                    Some(MotionCommand::Toggle) => {
                        enabled = !enabled;
                        tracker.reset(Instant::now());
                        delay = settings.scan_interval;
                        info!(enabled, "motion sensor toggled");
                    }
                    None => control_open = false,
                }
                continue;
            }
            _ = sleep(delay) => {}
        }

        if !enabled {
            continue;
        }

        let (back, frame) = tokio::select! {
            _ = cancel.cancelled() => break,
            grabbed = grab(camera) => grabbed?,
        };
        camera = back;
        let frame = match frame {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(err) => {
                failures += 1;
                warn!(failures, "frame grab failed: {err}");
                if failures >= MAX_GRAB_FAILURES {
                    warn!("camera keeps failing; motion monitor disabled");
                    break;
                }
                continue;
            }
        };

        let moved = window.push(frame);
        delay = if moved {
            settings.presence_interval
        } else {
            settings.scan_interval
        };
        if moved {
            debug!("motion present");
        }

        if let Some(msg) = tracker.observe(moved, Instant::now()) {
            info!(message = ?msg, "motion edge");
            out.send(msg)
                .await
                .context("failed to send motion message")?;
        }
    }

    Ok(())
}
