use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use picframe::config::{Configuration, Dimensions, SourceConfig};
use picframe::display::snapshot::SnapshotFactory;
use picframe::events::{Message, MotionCommand, TimerCommand};
use picframe::keymap::{self, KeyRouter};
use picframe::schedule::{self, BlackoutSchedule};
use picframe::source;
use picframe::tasks::coordinator::{Coordinator, CoordinatorSettings};
use picframe::tasks::motion::{self, MotionSettings, SnapshotCamera};
use picframe::tasks::keyboard::{self, RawTerminal};
use picframe::tasks::timer;

/// Time given to tasks that ignore cancellation (a blocked stdin read).
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "picframe", version, about = "Digital picture frame controller")]
struct Cli {
    /// Path to YAML config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Directory (or image) to show; repeat for several
    #[arg(short, long = "path", value_name = "DIR")]
    paths: Vec<PathBuf>,
    /// Show a single image
    #[arg(short, long, value_name = "FILE", conflicts_with = "paths")]
    image: Option<PathBuf>,
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(short, long = "debug-level", value_name = "LEVEL")]
    debug_level: Option<String>,
    /// Append logs to this file
    #[arg(short, long, value_name = "FILE")]
    log_file: Option<PathBuf>,
    /// Start fullscreen
    #[arg(short, long, conflicts_with = "geometry")]
    fullscreen: bool,
    /// Windowed surface size, e.g. 800x480
    #[arg(short, long, value_name = "WxH")]
    geometry: Option<Dimensions>,
}

fn load_configuration(cli: &Cli) -> Result<Configuration> {
    let mut cfg = match &cli.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };

    if let Some(image) = &cli.image {
        cfg.source = SourceConfig::Filesystem {
            paths: vec![image.clone()],
            shuffle: false,
        };
    } else if !cli.paths.is_empty() {
        let shuffle = matches!(cfg.source, SourceConfig::Filesystem { shuffle: true, .. });
        cfg.source = SourceConfig::Filesystem {
            paths: cli.paths.clone(),
            shuffle,
        };
    }
    if let Some(level) = &cli.debug_level {
        cfg.log_level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        cfg.log_file = Some(file.clone());
    }
    if let Some(geometry) = cli.geometry {
        cfg.geometry = geometry;
        cfg.fullscreen = false;
    }
    if cli.fullscreen {
        cfg.fullscreen = true;
    }

    cfg.validated().context("invalid configuration values")
}

fn init_tracing(cfg: &Configuration) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .with_context(|| format!("invalid log level '{}'", cfg.log_level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();
    match &cfg.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_configuration(&cli)?;
    init_tracing(&cfg)?;
    tracing::info!("Loaded configuration:\n{:#?}", cfg);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let result = runtime.block_on(run(cfg));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(cfg: Configuration) -> Result<()> {
    // Channels (small/bounded)
    let (frame_tx, frame_rx) = mpsc::channel::<Message>(64); // Producers -> Coordinator
    let (timer_tx, timer_rx) = mpsc::channel::<TimerCommand>(8); // Keys -> Timer

    let cancel = CancellationToken::new();

    let provider = source::from_config(&cfg.source, &cancel).context("failed to open image source")?;

    let camera = match cfg.motion.timeout() {
        Some(timeout) => match SnapshotCamera::open(&cfg.motion.snapshot_dir, cfg.motion.camera_port) {
            Ok(camera) => Some((camera, MotionSettings::from_config(&cfg.motion, timeout))),
            Err(err) => {
                tracing::warn!("{err}; motion monitor disabled");
                None
            }
        },
        None => None,
    };
    let (motion_tx, motion_rx) = match camera {
        Some(_) => {
            let (tx, rx) = mpsc::channel::<MotionCommand>(4); // Coordinator -> Motion
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };

    let router = KeyRouter::new(frame_tx.clone(), Some(timer_tx));
    let factory = SnapshotFactory::new(cfg.surface.output.clone(), cfg.screen_geometry);
    let mut coordinator = Coordinator::new(
        factory,
        provider,
        CoordinatorSettings {
            windowed: cfg.geometry,
            fullscreen: cfg.fullscreen,
        },
        router.clone().sink(),
        motion_tx,
    )
    .context("failed to create display surface")?;

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Timer
    tasks.spawn({
        let settings = timer::TimerSettings {
            interval: cfg.display_interval,
            step: cfg.interval_step,
        };
        let frame_tx = frame_tx.clone();
        let cancel = cancel.clone();
        async move {
            timer::run(settings, frame_tx, timer_rx, cancel)
                .await
                .context("timer task failed")
        }
    });

    // Blackout schedule
    if let Some(blackout) = &cfg.blackout {
        let schedule = BlackoutSchedule::from_config(blackout);
        let frame_tx = frame_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            schedule::run(schedule, frame_tx, cancel)
                .await
                .context("blackout task failed")
        });
    }

    // Motion monitor
    if let (Some((camera, settings)), Some(motion_rx)) = (camera, motion_rx) {
        let frame_tx = frame_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            motion::run(camera, settings, frame_tx, motion_rx, cancel)
                .await
                .context("motion task failed")
        });
    }

    // Keyboard
    if io::stdin().is_terminal() {
        println!("{}", keymap::help_text());
        // dropped with the task, which restores cooked mode
        let raw = match RawTerminal::enable() {
            Ok(raw) => Some(raw),
            Err(err) => {
                tracing::warn!("{err:#}; keys need Enter");
                None
            }
        };
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _raw = raw;
            keyboard::run(tokio::io::stdin(), router, cancel)
                .await
                .context("keyboard task failed")
        });
    } else {
        tracing::debug!("stdin is not a terminal; keyboard listener disabled");
    }

    // Show the first picture without waiting for the timer.
    frame_tx
        .send(Message::NextImageKeyboard)
        .await
        .context("failed to queue the first image")?;
    drop(frame_tx);

    let outcome = coordinator.run(frame_rx, cancel.clone()).await;

    cancel.cancel();
    tasks.abort_all();
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("{err:#}"),
            Err(err) if err.is_cancelled() => {}
            Err(err) => tracing::warn!("task panicked: {err}"),
        }
    }

    if let Err(err) = outcome {
        tracing::error!("settings at failure:\n{:#?}", cfg);
        return Err(err).context("picframe stopped on a fatal error");
    }
    tracing::info!("shutdown complete");
    Ok(())
}
