use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, ensure};
use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::Deserialize;
use serde::de::{self, Deserializer};

/// Width and height in pixels, written as `"1920x1080"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Dimensions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("geometry '{s}' must look like WIDTHxHEIGHT"))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid width in geometry '{s}'"))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid height in geometry '{s}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("geometry '{s}' must be non-zero"));
        }
        Ok(Self { width, height })
    }
}

impl<'de> Deserialize<'de> for Dimensions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Minute of the day, parsed from `"HH:MM"` or `"HH:MM:SS"` (seconds dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MINUTES_PER_DAY: u16 = 24 * 60;

    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self(hour * 60 + minute))
    }

    pub fn from_time(time: impl Timelike) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        for format in ["%H:%M:%S", "%H:%M"] {
            if let Ok(parsed) = NaiveTime::parse_from_str(trimmed, format) {
                return Ok(Self::from_time(parsed));
            }
        }
        Err(de::Error::custom(format!("invalid time literal '{raw}'")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BlackoutConfig {
    /// First dark minute.
    pub start: TimeOfDay,
    /// First minute after the dark window.
    pub end: TimeOfDay,
    /// Evaluate the window in this zone instead of the host's local time.
    #[serde(default)]
    pub timezone: Option<Tz>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct MotionConfig {
    /// Minutes without motion before the frame goes dark. `None`/0 disables the monitor.
    pub timeout_minutes: Option<u32>,
    /// Sampled pixels that must change between frames to count as motion.
    pub pixel_threshold: usize,
    pub camera_port: u32,
    /// Whether the sensor starts enabled (it can be toggled with `m`).
    pub enabled: bool,
    /// Directory a capture daemon writes `camera-<port>.jpg` frames into.
    pub snapshot_dir: PathBuf,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: None,
            pixel_threshold: 20,
            camera_port: 0,
            enabled: true,
            snapshot_dir: PathBuf::from("/run/picframe"),
        }
    }
}

impl MotionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(u64::from(m) * 60))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum SourceConfig {
    Filesystem {
        /// Directories walked recursively, or single image files.
        #[serde(default)]
        paths: Vec<PathBuf>,
        /// Shuffle the order of each pass.
        #[serde(default)]
        shuffle: bool,
    },
    #[serde(rename_all = "kebab-case")]
    CloudDrive {
        /// Local mirror of the drive (e.g. an rclone mount).
        mirror_path: PathBuf,
        /// Top-level folder where traversal starts.
        root_folder: String,
        /// Folder whose subtree holds the photos; may equal `root-folder`.
        photos_folder: String,
        /// Where downloaded photos are stored before display.
        #[serde(default = "SourceConfig::default_cache_dir")]
        cache_dir: PathBuf,
        #[serde(default = "SourceConfig::default_max_depth")]
        max_depth: usize,
        #[serde(default = "SourceConfig::default_retry_attempts")]
        retry_attempts: u32,
        #[serde(
            default = "SourceConfig::default_retry_delay",
            with = "humantime_serde"
        )]
        retry_delay: Duration,
    },
}

impl SourceConfig {
    fn default_cache_dir() -> PathBuf {
        std::env::temp_dir().join("picframe")
    }

    const fn default_max_depth() -> usize {
        32
    }

    const fn default_retry_attempts() -> u32 {
        3
    }

    const fn default_retry_delay() -> Duration {
        Duration::from_millis(500)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Filesystem {
            paths: Vec::new(),
            shuffle: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SurfaceConfig {
    /// PNG file the current frame is published to.
    pub output: PathBuf,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("/run/picframe/frame.png"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Log filter used when `RUST_LOG` is unset (`error`..`trace`).
    pub log_level: String,
    /// Append logs to this file instead of stdout.
    pub log_file: Option<PathBuf>,
    pub fullscreen: bool,
    /// Windowed surface size.
    pub geometry: Dimensions,
    /// Surface size used while fullscreen.
    pub screen_geometry: Dimensions,
    /// Time each image stays up before the timer asks for the next one.
    #[serde(with = "humantime_serde")]
    pub display_interval: Duration,
    /// Amount `P`/`p` change the display interval by.
    #[serde(with = "humantime_serde")]
    pub interval_step: Duration,
    /// Nightly dark window; absent means no scheduled blackout.
    pub blackout: Option<BlackoutConfig>,
    pub motion: MotionConfig,
    pub source: SourceConfig,
    pub surface: SurfaceConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            fullscreen: false,
            geometry: Dimensions::new(800, 480),
            screen_geometry: Dimensions::new(1920, 1080),
            display_interval: Duration::from_secs(5),
            interval_step: Duration::from_secs(1),
            blackout: None,
            motion: MotionConfig::default(),
            source: SourceConfig::default(),
            surface: SurfaceConfig::default(),
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.interval_step.is_zero(),
            "interval-step must be greater than zero"
        );
        ensure!(
            self.display_interval >= self.interval_step,
            "display-interval must be at least one interval-step"
        );
        ensure!(
            !self.log_level.trim().is_empty(),
            "log-level must not be blank"
        );
        if let Some(blackout) = &self.blackout {
            ensure!(
                blackout.start != blackout.end,
                "blackout.start and blackout.end must differ (got {} for both)",
                blackout.start
            );
        }
        ensure!(
            self.motion.pixel_threshold > 0,
            "motion.pixel-threshold must be greater than zero"
        );
        match &self.source {
            SourceConfig::Filesystem { paths, .. } => {
                ensure!(
                    !paths.is_empty(),
                    "source.paths must list at least one directory or image"
                );
            }
            SourceConfig::CloudDrive {
                root_folder,
                photos_folder,
                max_depth,
                retry_attempts,
                ..
            } => {
                ensure!(
                    !root_folder.trim().is_empty(),
                    "source.root-folder must not be blank"
                );
                ensure!(
                    !photos_folder.trim().is_empty(),
                    "source.photos-folder must not be blank"
                );
                ensure!(*max_depth > 0, "source.max-depth must be greater than zero");
                ensure!(
                    *retry_attempts > 0,
                    "source.retry-attempts must be greater than zero"
                );
            }
        }
        ensure!(
            !self.surface.output.as_os_str().is_empty(),
            "surface.output must not be empty"
        );
        Ok(self)
    }
}
