use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::{Duration, Instant};

use picframe::config::Dimensions;
use picframe::display::{DisplaySurface, Geometry, KeySink, SurfaceFactory};
use picframe::error::Error;
use picframe::events::{Message, MotionCommand};
use picframe::source::{Bitmap, ImageProvider, ImageRef, RenderRequest};
use picframe::state::Mode;
use picframe::tasks::coordinator::{Coordinator, CoordinatorSettings, Flow};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WINDOWED: Dimensions = Dimensions::new(800, 480);
const SCREEN: Dimensions = Dimensions::new(1920, 1080);

#[derive(Default)]
struct Log {
    frames: Vec<Option<PathBuf>>,
    errors: Vec<String>,
    created: Vec<Geometry>,
    closes: usize,
    sinks: usize,
    /// Size every surface reports instead of the one it was built with.
    reported: Option<Dimensions>,
}

type SharedLog = Arc<Mutex<Log>>;

struct RecordingSurface {
    log: SharedLog,
    size: Dimensions,
}

impl DisplaySurface for RecordingSurface {
    fn show(&mut self, bitmap: Option<&Bitmap>) -> Result<(), Error> {
        self.log
            .lock()
            .unwrap()
            .frames
            .push(bitmap.map(|b| b.source.clone()));
        Ok(())
    }

    fn show_error(&mut self, message: &str) -> Result<(), Error> {
        self.log.lock().unwrap().errors.push(message.to_string());
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        self.log.lock().unwrap().reported.unwrap_or(self.size)
    }

    fn resize(&mut self, size: Dimensions) -> Result<(), Error> {
        self.size = size;
        Ok(())
    }

    fn set_fullscreen(&mut self, _fullscreen: bool) -> Result<(), Error> {
        Ok(())
    }

    fn on_key(&mut self, _sink: KeySink) {
        self.log.lock().unwrap().sinks += 1;
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

struct RecordingFactory {
    log: SharedLog,
    fullscreen_supported: bool,
}

impl SurfaceFactory for RecordingFactory {
    type Surface = RecordingSurface;

    fn create(&mut self, geometry: &Geometry) -> Result<RecordingSurface, Error> {
        if geometry.fullscreen && !self.fullscreen_supported {
            return Err(Error::NotImplemented("fullscreen surfaces"));
        }
        self.log.lock().unwrap().created.push(*geometry);
        Ok(RecordingSurface {
            log: Arc::clone(&self.log),
            size: geometry.size,
        })
    }

    fn screen_size(&self) -> Dimensions {
        SCREEN
    }
}

/// Cycles through a fixed list; files in `broken` fail to decode.
struct ListProvider {
    images: Vec<PathBuf>,
    broken: HashSet<PathBuf>,
    next: usize,
}

impl ListProvider {
    fn new(images: &[&str]) -> Self {
        Self {
            images: images.iter().map(PathBuf::from).collect(),
            broken: HashSet::new(),
            next: 0,
        }
    }
}

impl ImageProvider for ListProvider {
    fn next(&mut self) -> Result<ImageRef, Error> {
        if self.images.is_empty() {
            return Err(Error::NoImagesFound);
        }
        let path = self.images[self.next % self.images.len()].clone();
        self.next += 1;
        Ok(ImageRef::new(path))
    }

    fn resolve(&self, image: &ImageRef, request: &RenderRequest) -> Result<Bitmap, Error> {
        if self.broken.contains(image.path()) {
            return Err(Error::Decode {
                path: image.path().to_path_buf(),
                reason: "truncated".into(),
            });
        }
        Ok(Bitmap {
            source: image.path().to_path_buf(),
            width: request.size.width,
            height: request.size.height,
            pixels: Vec::new(),
        })
    }
}

/// Blocks in `next` until the test drops the sending half of `release`.
struct StalledProvider {
    release: std_mpsc::Receiver<()>,
}

impl ImageProvider for StalledProvider {
    fn next(&mut self) -> Result<ImageRef, Error> {
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        Err(Error::NoImagesFound)
    }
}

fn build<P: ImageProvider + 'static>(
    provider: P,
    fullscreen_supported: bool,
    motion: Option<mpsc::Sender<MotionCommand>>,
) -> (Coordinator<RecordingFactory, P>, SharedLog) {
    let log = SharedLog::default();
    let factory = RecordingFactory {
        log: Arc::clone(&log),
        fullscreen_supported,
    };
    let coordinator = Coordinator::new(
        factory,
        provider,
        CoordinatorSettings {
            windowed: WINDOWED,
            fullscreen: false,
        },
        Arc::new(|_: char| {}),
        motion,
    )
    .unwrap();
    (coordinator, log)
}

fn frame() -> ListProvider {
    ListProvider::new(&["/p/a.jpg", "/p/b.jpg", "/p/c.jpg", "/p/d.jpg"])
}

fn current(c: &Coordinator<RecordingFactory, ListProvider>) -> Option<PathBuf> {
    c.cursor().current().map(|i| i.path().to_path_buf())
}

fn last_frame(log: &SharedLog) -> Option<PathBuf> {
    log.lock().unwrap().frames.last().cloned().flatten()
}

fn send(c: &mut Coordinator<RecordingFactory, ListProvider>, messages: &[Message]) {
    for &msg in messages {
        assert_eq!(c.handle(msg).unwrap(), Flow::Continue, "{msg:?}");
    }
}

#[test]
fn surface_is_primed_blank() {
    let (c, log) = build(frame(), true, None);
    let log = log.lock().unwrap();
    assert_eq!(log.frames, vec![None]);
    assert_eq!(log.sinks, 1);
    assert_eq!(c.mode(), Mode::Normal);
}

#[test]
fn timer_advances_in_normal_and_rerenders_in_hold() {
    let (mut c, log) = build(frame(), true, None);
    send(&mut c, &[Message::NextImageKeyboard, Message::NextImageTimer]);
    assert_eq!(current(&c), Some(PathBuf::from("/p/b.jpg")));
    assert_eq!(c.mode(), Mode::Normal);

    send(&mut c, &[Message::Hold]);
    assert_eq!(c.mode(), Mode::KeyboardHold);
    let before = log.lock().unwrap().frames.len();

    send(&mut c, &[Message::NextImageTimer]);
    assert_eq!(current(&c), Some(PathBuf::from("/p/b.jpg")));
    assert_eq!(c.mode(), Mode::KeyboardHold);
    assert_eq!(log.lock().unwrap().frames.len(), before + 1);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/b.jpg")));
}

#[test]
fn keyboard_next_advances_in_every_mode() {
    let entries: [(Mode, &[Message]); 5] = [
        (Mode::Normal, &[]),
        (Mode::KeyboardHold, &[Message::Hold]),
        (Mode::KeyboardBlackout, &[Message::BlackoutKeyboard]),
        (Mode::Blackout, &[Message::BlackoutScheduleStart]),
        (Mode::MotionBlackout, &[Message::MotionTimeout]),
    ];
    for (mode, setup) in entries {
        let (mut c, log) = build(frame(), true, None);
        send(&mut c, &[Message::NextImageKeyboard]);
        send(&mut c, setup);
        assert_eq!(c.mode(), mode);

        let before = current(&c);
        send(&mut c, &[Message::NextImageKeyboard]);
        let after = current(&c);
        assert!(after.is_some(), "{mode:?}");
        assert_ne!(after, before, "{mode:?}");
        assert_eq!(last_frame(&log), after, "{mode:?}");
        assert_eq!(c.mode(), mode);
    }
}

#[test]
fn blackout_key_blanks_then_shows_next_image() {
    let (mut c, log) = build(frame(), true, None);
    send(&mut c, &[Message::NextImageKeyboard]);

    send(&mut c, &[Message::BlackoutKeyboard]);
    assert_eq!(c.mode(), Mode::KeyboardBlackout);
    assert!(c.cursor().is_blank());
    assert_eq!(last_frame(&log), None);

    send(&mut c, &[Message::BlackoutKeyboard]);
    assert_eq!(c.mode(), Mode::Normal);
    assert_eq!(current(&c), Some(PathBuf::from("/p/b.jpg")));
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/b.jpg")));
}

#[test]
fn hold_during_blackout_brings_back_the_previous_picture() {
    let (mut c, log) = build(frame(), true, None);
    send(&mut c, &[Message::NextImageKeyboard, Message::BlackoutScheduleStart]);
    assert_eq!(c.mode(), Mode::Blackout);
    assert_eq!(last_frame(&log), None);

    send(&mut c, &[Message::Hold]);
    assert_eq!(c.mode(), Mode::KeyboardHold);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/a.jpg")));

    send(&mut c, &[Message::Hold]);
    assert_eq!(c.mode(), Mode::Normal);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/b.jpg")));
}

#[test]
fn schedule_and_motion_do_not_clobber_keyboard_modes() {
    let (mut c, log) = build(frame(), true, None);
    send(
        &mut c,
        &[
            Message::NextImageKeyboard,
            Message::Hold,
            Message::BlackoutScheduleStart,
            Message::MotionTimeout,
        ],
    );
    assert_eq!(c.mode(), Mode::KeyboardHold);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/a.jpg")));

    send(&mut c, &[Message::Hold, Message::BlackoutKeyboard, Message::BlackoutScheduleEnd]);
    assert_eq!(c.mode(), Mode::KeyboardBlackout);
    assert_eq!(last_frame(&log), None);
}

#[test]
fn schedule_end_resumes_the_slideshow() {
    let (mut c, log) = build(frame(), true, None);
    send(
        &mut c,
        &[
            Message::NextImageKeyboard,
            Message::BlackoutScheduleStart,
            Message::NextImageTimer,
        ],
    );
    assert_eq!(last_frame(&log), None);
    send(&mut c, &[Message::BlackoutScheduleEnd]);
    assert_eq!(c.mode(), Mode::Normal);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/b.jpg")));
}

#[test]
fn brightness_rerenders_without_changing_mode() {
    let (mut c, log) = build(frame(), true, None);
    send(&mut c, &[Message::NextImageKeyboard]);
    let before = log.lock().unwrap().frames.len();

    send(&mut c, &[Message::IncreaseBrightness, Message::IncreaseBrightness]);
    assert!((c.brightness().factor() - 1.1).abs() < 1e-6);
    assert_eq!(log.lock().unwrap().frames.len(), before + 2);
    assert_eq!(current(&c), Some(PathBuf::from("/p/a.jpg")));

    send(&mut c, &[Message::DecreaseBrightness, Message::DefaultBrightness]);
    assert!(c.brightness().is_default());
    assert_eq!(c.mode(), Mode::Normal);
}

#[test]
fn fullscreen_toggle_rebuilds_the_surface() {
    let (mut c, log) = build(frame(), true, None);
    send(&mut c, &[Message::NextImageKeyboard, Message::FullscreenToggle]);
    assert_eq!(
        c.geometry(),
        Geometry {
            size: SCREEN,
            fullscreen: true
        }
    );
    send(&mut c, &[Message::FullscreenToggle]);
    assert_eq!(c.geometry().size, WINDOWED);

    let log = log.lock().unwrap();
    let sizes: Vec<_> = log.created.iter().map(|g| g.size).collect();
    assert_eq!(sizes, vec![WINDOWED, SCREEN, WINDOWED]);
    assert_eq!(log.closes, 2);
    assert_eq!(log.sinks, 3);
    assert_eq!(log.frames.last().cloned().flatten(), Some(PathBuf::from("/p/a.jpg")));
    assert_eq!(c.mode(), Mode::Normal);
}

#[test]
fn missing_fullscreen_support_is_fatal() {
    let (mut c, _log) = build(frame(), false, None);
    let err = c.handle(Message::FullscreenToggle).unwrap_err();
    assert!(matches!(err, Error::NotImplemented(_)), "{err}");
    assert!(!err.is_recoverable());
}

#[test]
fn changed_surface_size_triggers_rebuild() {
    let (mut c, log) = build(frame(), true, None);
    send(&mut c, &[Message::NextImageKeyboard]);
    log.lock().unwrap().reported = Some(Dimensions::new(1024, 600));

    send(&mut c, &[Message::NextImageTimer]);
    assert_eq!(c.geometry().size, Dimensions::new(1024, 600));
    assert_eq!(log.lock().unwrap().created.len(), 2);

    send(&mut c, &[Message::NextImageTimer]);
    assert_eq!(log.lock().unwrap().created.len(), 2);
}

#[test]
fn decode_failure_shows_blank_and_keeps_going() {
    let mut provider = frame();
    provider.broken.insert(PathBuf::from("/p/a.jpg"));
    let (mut c, log) = build(provider, true, None);

    send(&mut c, &[Message::NextImageKeyboard]);
    assert_eq!(last_frame(&log), None);
    assert_eq!(current(&c), Some(PathBuf::from("/p/a.jpg")));

    send(&mut c, &[Message::NextImageTimer]);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/b.jpg")));
}

#[test]
fn motion_toggle_is_forwarded_and_leaves_motion_blackout() {
    let (tx, mut rx) = mpsc::channel(4);
    let (mut c, log) = build(frame(), true, Some(tx));
    send(&mut c, &[Message::NextImageKeyboard, Message::MotionTimeout]);
    assert_eq!(c.mode(), Mode::MotionBlackout);

    send(&mut c, &[Message::ToggleMotionSensor]);
    assert_eq!(rx.try_recv().ok(), Some(MotionCommand::Toggle));
    assert_eq!(c.mode(), Mode::Normal);
    assert_eq!(last_frame(&log), Some(PathBuf::from("/p/b.jpg")));

    send(&mut c, &[Message::ToggleMotionSensor]);
    assert_eq!(rx.try_recv().ok(), Some(MotionCommand::Toggle));
    assert_eq!(current(&c), Some(PathBuf::from("/p/b.jpg")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quit_stops_the_loop_and_releases_the_surface() {
    let (mut c, log) = build(frame(), true, None);
    let (tx, rx) = mpsc::channel(8);
    tx.send(Message::NextImageKeyboard).await.unwrap();
    tx.send(Message::Quit).await.unwrap();
    tx.send(Message::NextImageKeyboard).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), c.run(rx, CancellationToken::new()))
        .await
        .expect("coordinator did not stop")
        .unwrap();
    assert_eq!(current(&c), Some(PathBuf::from("/p/a.jpg")));
    assert_eq!(log.lock().unwrap().closes, 1);
    assert!(log.lock().unwrap().errors.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_source_is_fatal() {
    let (mut c, log) = build(ListProvider::new(&[]), true, None);
    let (tx, rx) = mpsc::channel(8);
    tx.send(Message::NextImageKeyboard).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), c.run(rx, CancellationToken::new()))
        .await
        .expect("coordinator looped instead of failing")
        .unwrap_err();
    assert!(matches!(err, Error::NoImagesFound));
    let log = log.lock().unwrap();
    assert_eq!(log.errors.len(), 1);
    assert!(log.errors[0].contains("no images"), "{}", log.errors[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_an_idle_loop() {
    let (mut c, _log) = build(frame(), true, None);
    let (_tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), c.run(rx, cancel))
        .await
        .expect("coordinator ignored cancellation")
        .unwrap();
}

#[tokio::test]
async fn cancellation_interrupts_a_slow_provider() {
    let (release_tx, release_rx) = std_mpsc::channel();
    let (mut c, log) = build(StalledProvider { release: release_rx }, true, None);
    let (tx, rx) = mpsc::channel(8);
    tx.send(Message::NextImageKeyboard).await.unwrap();

    let cancel = CancellationToken::new();
    let ticks = Arc::new(AtomicU32::new(0));
    let ticker = tokio::spawn({
        let ticks = Arc::clone(&ticks);
        let cancel = cancel.clone();
        async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
            cancel.cancel();
        }
    });

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(2), c.run(rx, cancel))
        .await
        .expect("coordinator stayed stuck in the provider")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    // the single-threaded runtime kept scheduling other tasks meanwhile
    assert_eq!(ticks.load(Ordering::SeqCst), 5);
    ticker.await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.closes, 1);
    assert!(log.errors.is_empty());
    assert_eq!(log.frames, vec![None]);
    drop(release_tx);
}
