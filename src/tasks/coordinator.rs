use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::brightness::{Brightness, BrightnessChange};
use crate::config::Dimensions;
use crate::display::{DisplaySurface, Geometry, KeySink, SurfaceFactory};
use crate::error::Error;
use crate::events::{Message, MotionCommand};
use crate::source::{Bitmap, ImageProvider, ImageRef, RenderRequest};
use crate::state::{self, Mode, StateMachine};

/// What the coordinator does on the display for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Pull the next image from the provider and show it.
    Advance,
    /// Show the current picture again (or blank if there is none).
    Rerender,
    Blank,
    /// Undo a blank by showing the picture that was up before it.
    Restore,
    Brightness(BrightnessChange),
    RebuildSurface,
    Quit,
}

/// Decides the display action from the mode the message arrives in.
///
/// Keyboard "next" always advances. Automation messages only touch the
/// display when the current mode recognises them; otherwise the current
/// picture is re-rendered unchanged.
pub fn plan(mode: Mode, message: Message) -> Action {
    use Message as M;
    match message {
        M::NextImageKeyboard => Action::Advance,
        M::NextImageTimer if mode == Mode::Normal => Action::Advance,
        M::NextImageTimer => Action::Rerender,
        M::Hold if mode == Mode::KeyboardHold => Action::Advance,
        M::Hold => Action::Restore,
        M::BlackoutKeyboard => match state::target(mode, message) {
            Some(Mode::Normal) => Action::Advance,
            _ => Action::Blank,
        },
        M::IncreaseBrightness => Action::Brightness(BrightnessChange::Increase),
        M::DecreaseBrightness => Action::Brightness(BrightnessChange::Decrease),
        M::DefaultBrightness => Action::Brightness(BrightnessChange::Default),
        M::ToggleMotionSensor if mode == Mode::MotionBlackout => Action::Advance,
        M::ToggleMotionSensor => Action::Rerender,
        M::FullscreenToggle => Action::RebuildSurface,
        M::Quit => Action::Quit,
        M::BlackoutScheduleStart | M::MotionTimeout if mode == Mode::Normal => Action::Blank,
        M::BlackoutScheduleEnd if mode == Mode::Blackout => Action::Advance,
        M::MotionDetected if mode == Mode::MotionBlackout => Action::Advance,
        M::BlackoutScheduleStart
        | M::BlackoutScheduleEnd
        | M::MotionDetected
        | M::MotionTimeout => Action::Rerender,
    }
}

/// Current and previous picture. `None` as current means the frame is blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCursor {
    current: Option<ImageRef>,
    previous: Option<ImageRef>,
}

impl ImageCursor {
    pub fn current(&self) -> Option<&ImageRef> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&ImageRef> {
        self.previous.as_ref()
    }

    pub fn is_blank(&self) -> bool {
        self.current.is_none()
    }

    pub fn advance(&mut self, image: ImageRef) {
        self.previous = self.current.replace(image);
    }

    /// Blanking an already blank frame keeps the remembered picture.
    pub fn blank(&mut self) {
        if self.current.is_some() {
            self.previous = self.current.take();
        }
    }

    /// Brings back the picture shown before the last blank. Returns `false`
    /// when there was nothing to bring back.
    pub fn restore(&mut self) -> bool {
        if self.current.is_some() || self.previous.is_none() {
            return false;
        }
        self.current = self.previous.take();
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// Surface size while not fullscreen.
    pub windowed: Dimensions,
    pub fullscreen: bool,
}

/// Provider work one message needs: optionally pull the next image, then
/// decode whatever is current. Runs on the blocking pool under `run`.
#[derive(Debug, Clone)]
struct Job {
    advance: bool,
    current: Option<ImageRef>,
    request: RenderRequest,
}

#[derive(Debug)]
struct Loaded {
    next: Option<ImageRef>,
    bitmap: Option<Bitmap>,
}

enum Prepared {
    Quit,
    Continue { message: Message, job: Option<Job> },
}

fn load<P: ImageProvider>(provider: &Mutex<P>, job: &Job) -> Result<Loaded, Error> {
    let mut provider = provider.lock().unwrap_or_else(PoisonError::into_inner);
    let next = if job.advance {
        Some(provider.next()?)
    } else {
        None
    };
    let Some(image) = next.as_ref().or(job.current.as_ref()) else {
        return Ok(Loaded {
            next: None,
            bitmap: None,
        });
    };
    let bitmap = match provider.resolve(image, &job.request) {
        Ok(bitmap) => Some(bitmap),
        Err(err) if err.is_recoverable() => {
            warn!(image = %image, "{err}; showing blank");
            None
        }
        Err(err) => return Err(err),
    };
    Ok(Loaded { next, bitmap })
}

/// Sole owner of the mode, the image cursor, the brightness and the display
/// surface. Producers only ever reach it through messages.
pub struct Coordinator<F: SurfaceFactory, P> {
    factory: F,
    provider: Arc<Mutex<P>>,
    settings: CoordinatorSettings,
    surface: F::Surface,
    geometry: Geometry,
    machine: StateMachine,
    cursor: ImageCursor,
    brightness: Brightness,
    keys: KeySink,
    motion_control: Option<Sender<MotionCommand>>,
    handled: u64,
}

impl<F, P> Coordinator<F, P>
where
    F: SurfaceFactory,
    P: ImageProvider + 'static,
{
    pub fn new(
        mut factory: F,
        provider: P,
        settings: CoordinatorSettings,
        keys: KeySink,
        motion_control: Option<Sender<MotionCommand>>,
    ) -> Result<Self, Error> {
        let geometry = geometry_for(&factory, &settings, settings.fullscreen);
        let surface = build_surface(&mut factory, &geometry, &keys)?;
        info!(size = %geometry.size, fullscreen = geometry.fullscreen, "display surface ready");
        Ok(Self {
            factory,
            provider: Arc::new(Mutex::new(provider)),
            settings,
            surface,
            geometry,
            machine: StateMachine::new(),
            cursor: ImageCursor::default(),
            brightness: Brightness::new(),
            keys,
            motion_control,
            handled: 0,
        })
    }

    pub fn mode(&self) -> Mode {
        self.machine.current()
    }

    pub fn cursor(&self) -> &ImageCursor {
        &self.cursor
    }

    pub fn brightness(&self) -> Brightness {
        self.brightness
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn surface(&self) -> &F::Surface {
        &self.surface
    }

    /// Processes one message: plan against the current mode, perform the
    /// display action, then apply the mode transition. Provider work runs on
    /// the calling thread.
    pub fn handle(&mut self, message: Message) -> Result<Flow, Error> {
        match self.prepare(message)? {
            Prepared::Quit => Ok(Flow::Quit),
            Prepared::Continue { message, job } => {
                let loaded = match &job {
                    Some(job) => Some(load(&self.provider, job)?),
                    None => None,
                };
                self.finish(message, loaded)
            }
        }
    }

    /// Consumes the inbox until QUIT, cancellation, or a fatal error. Fatal
    /// errors are shown on the surface before they are returned.
    pub async fn run(
        &mut self,
        mut inbox: Receiver<Message>,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("coordinator cancelled");
                    break;
                }
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => {
                        debug!("all producers gone");
                        break;
                    }
                },
            };
            match self.step(message, &cancel).await {
                Ok(Some(Flow::Continue)) => {}
                Ok(Some(Flow::Quit)) => break,
                Ok(None) => {
                    info!("coordinator cancelled while loading");
                    break;
                }
                Err(err) => {
                    self.report_fatal(&err);
                    self.surface.close();
                    return Err(err);
                }
            }
        }
        self.surface.close();
        Ok(())
    }

    /// `handle` with the provider work moved to the blocking pool. `None`
    /// means `cancel` fired while that work was still running.
    async fn step(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<Option<Flow>, Error> {
        let (message, job) = match self.prepare(message)? {
            Prepared::Quit => return Ok(Some(Flow::Quit)),
            Prepared::Continue { message, job } => (message, job),
        };
        let loaded = match job {
            Some(job) => {
                let provider = Arc::clone(&self.provider);
                let work = tokio::task::spawn_blocking(move || load(&provider, &job));
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    joined = work => Some(joined.map_err(|e| Error::Worker(e.to_string()))??),
                }
            }
            None => None,
        };
        self.finish(message, loaded).map(Some)
    }

    /// Everything up to the provider call: geometry watch, planning, the
    /// motion toggle and the cursor/brightness side effects.
    fn prepare(&mut self, message: Message) -> Result<Prepared, Error> {
        self.handled += 1;
        self.check_geometry()?;

        let mode = self.machine.current();
        let action = plan(mode, message);
        debug!(message = ?message, origin = ?message.origin(), mode = ?mode, action = ?action, "dispatch");

        if message == Message::ToggleMotionSensor {
            self.forward_motion_toggle();
        }

        let advance = match action {
            Action::Advance => true,
            Action::Rerender => false,
            Action::Blank => {
                self.cursor.blank();
                self.surface.show(None)?;
                return Ok(Prepared::Continue { message, job: None });
            }
            Action::Restore => {
                if self.cursor.restore() {
                    debug!("restored previous image");
                }
                false
            }
            Action::Brightness(change) => {
                self.brightness.apply(change);
                info!(brightness = self.brightness.factor(), "brightness changed");
                false
            }
            Action::RebuildSurface => {
                let geometry = geometry_for(&self.factory, &self.settings, !self.geometry.fullscreen);
                self.rebuild(geometry)?;
                false
            }
            Action::Quit => {
                info!("quit");
                return Ok(Prepared::Quit);
            }
        };

        let job = Job {
            advance,
            current: self.cursor.current().cloned(),
            request: RenderRequest {
                size: self.surface.dimensions(),
                brightness: self.brightness.factor(),
            },
        };
        Ok(Prepared::Continue {
            message,
            job: Some(job),
        })
    }

    /// Shows what the provider produced, then applies the mode transition.
    fn finish(&mut self, message: Message, loaded: Option<Loaded>) -> Result<Flow, Error> {
        if let Some(loaded) = loaded {
            if let Some(image) = loaded.next {
                info!(image = %image, "next image");
                self.cursor.advance(image);
            }
            self.surface.show(loaded.bitmap.as_ref())?;
        }

        if let Some(change) = self.machine.apply(message) {
            info!(from = ?change.from, to = ?change.to, message = ?message, "mode changed");
        }
        Ok(Flow::Continue)
    }

    fn check_geometry(&mut self) -> Result<(), Error> {
        let reported = self.surface.dimensions();
        if reported == self.geometry.size {
            return Ok(());
        }
        info!(built = %self.geometry.size, reported = %reported, "surface geometry changed; rebuilding");
        self.rebuild(Geometry {
            size: reported,
            fullscreen: self.geometry.fullscreen,
        })
    }

    /// Replaces the surface. The new one starts blank; the caller's job
    /// paints the current picture onto it.
    fn rebuild(&mut self, geometry: Geometry) -> Result<(), Error> {
        self.surface.close();
        self.surface = build_surface(&mut self.factory, &geometry, &self.keys)?;
        self.geometry = geometry;
        info!(size = %geometry.size, fullscreen = geometry.fullscreen, "display surface rebuilt");
        Ok(())
    }

    fn forward_motion_toggle(&self) {
        match &self.motion_control {
            Some(control) => {
                if let Err(err) = control.try_send(MotionCommand::Toggle) {
                    warn!("motion toggle dropped: {err}");
                }
            }
            None => debug!("motion monitor not running; toggle ignored"),
        }
    }

    fn report_fatal(&mut self, err: &Error) {
        error!(
            error = %err,
            mode = ?self.machine.current(),
            previous_mode = ?self.machine.previous(),
            current_image = ?self.cursor.current().map(ToString::to_string),
            previous_image = ?self.cursor.previous().map(ToString::to_string),
            brightness = self.brightness.factor(),
            size = %self.geometry.size,
            fullscreen = self.geometry.fullscreen,
            windowed = %self.settings.windowed,
            messages = self.handled,
            "fatal error; stopping"
        );
        if let Err(show_err) = self.surface.show_error(&err.to_string()) {
            warn!("could not show error frame: {show_err}");
        }
    }
}

fn geometry_for<F: SurfaceFactory>(
    factory: &F,
    settings: &CoordinatorSettings,
    fullscreen: bool,
) -> Geometry {
    Geometry {
        size: if fullscreen {
            factory.screen_size()
        } else {
            settings.windowed
        },
        fullscreen,
    }
}

/// Creates a surface, hooks up key capture and primes it with a blank frame.
fn build_surface<F: SurfaceFactory>(
    factory: &mut F,
    geometry: &Geometry,
    keys: &KeySink,
) -> Result<F::Surface, Error> {
    let mut surface = factory.create(geometry)?;
    if surface.dimensions() != geometry.size {
        surface.resize(geometry.size)?;
    }
    surface.on_key(keys.clone());
    surface.show(None)?;
    Ok(surface)
}
