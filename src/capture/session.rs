use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::pacing::Pacer;
use super::FrameHandler;
use crate::frame::Frame;
use crate::ingest::{self, CaptureBackend, CaptureHints};

/// Buffers in a session's slot pool.
const SLOT_COUNT: usize = 2;

/// Sleep between polls while `pull` waits for the first frame.
const PULL_BACKOFF: Duration = Duration::from_millis(1);

/// Negotiated properties of an open session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Pacing rate in frames per second (never zero).
    pub rate: u32,
}

/// Fixed arena of frame buffers. The active index names the newest complete
/// frame; the capture thread only ever writes the other slot.
struct SlotPool {
    buffers: [Frame; SLOT_COUNT],
    active: usize,
}

impl SlotPool {
    fn new() -> Self {
        Self {
            buffers: Default::default(),
            active: 0,
        }
    }

    fn standby_index(&self) -> usize {
        (self.active + 1) % SLOT_COUNT
    }

    fn active(&self) -> &Frame {
        &self.buffers[self.active]
    }

    fn standby(&self) -> &Frame {
        &self.buffers[self.standby_index()]
    }

    fn standby_mut(&mut self) -> &mut Frame {
        let idx = self.standby_index();
        &mut self.buffers[idx]
    }

    /// Make the standby frame the active one.
    fn publish(&mut self) {
        self.active = self.standby_index();
    }
}

struct SessionState {
    /// `None` once the session has been stopped.
    slots: Option<SlotPool>,
    /// Frames processed since the last failure.
    frame_count: u64,
    /// A complete frame has been published at least once.
    has_frame: bool,
    handler: Option<Box<dyn FrameHandler>>,
}

/// One capture source with its own pacing thread.
pub struct CaptureSession {
    info: SessionInfo,
    state: Arc<Mutex<SessionState>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSession {
    /// Open `source` through `ingest::open` and start capturing.
    ///
    /// Device sources get `hints` geometry; files and URLs report their own.
    pub fn open(source: &str, hints: CaptureHints) -> Result<Self> {
        let owned = source.to_string();
        Self::spawn(source, move || ingest::open(&owned, hints))
            .with_context(|| format!("start capture session for {}", source))
    }

    /// Start a session whose backend is built by `factory` on the capture thread.
    ///
    /// Blocks until the backend is open and its geometry and rate are known.
    pub fn spawn<F>(name: &str, factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn CaptureBackend>> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(SessionState {
            slots: Some(SlotPool::new()),
            frame_count: 0,
            has_frame: false,
            handler: None,
        }));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<SessionInfo>>(1);

        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("capture {}", name))
            .spawn(move || {
                let mut backend = match factory() {
                    Ok(backend) => backend,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let (width, height) = backend.geometry();
                let info = SessionInfo {
                    source: backend.describe(),
                    width,
                    height,
                    rate: ingest::effective_rate(backend.native_rate()),
                };
                let rate = info.rate;
                if ready_tx.send(Ok(info)).is_err() {
                    return;
                }
                capture_loop(backend.as_mut(), &thread_state, rate);
            })
            .context("spawn capture thread")?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(anyhow!("capture thread exited during initialization"));
            }
        };

        log::info!(
            "capture session {}: {}x{} @ {}fps",
            info.source,
            info.width,
            info.height,
            info.rate
        );
        Ok(Self {
            info,
            state,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn rate(&self) -> u32 {
        self.info.rate
    }

    /// Register the per-frame handler, replacing any previous one.
    pub fn set_handler<H: FrameHandler + 'static>(&self, handler: H) {
        let previous = self.state().handler.replace(Box::new(handler));
        drop(previous);
    }

    /// Remove the per-frame handler, returning it.
    pub fn clear_handler(&self) -> Option<Box<dyn FrameHandler>> {
        self.state().handler.take()
    }

    /// Frames processed since the last failure/rewind.
    pub fn frame_count(&self) -> u64 {
        self.state().frame_count
    }

    pub fn is_stopped(&self) -> bool {
        self.state().slots.is_none()
    }

    /// Copy of the newest frame.
    ///
    /// Waits (polling with a short sleep) until the first frame exists.
    /// Returns `None` once the session is stopped.
    pub fn pull(&self) -> Option<Frame> {
        let mut frame = Frame::default();
        self.pull_into(&mut frame).then_some(frame)
    }

    /// Like `pull`, reusing `out`'s allocation. Returns false once stopped.
    pub fn pull_into(&self, out: &mut Frame) -> bool {
        loop {
            {
                let state = self.state();
                let Some(slots) = state.slots.as_ref() else {
                    return false;
                };
                if state.has_frame {
                    out.copy_from(slots.active());
                    return true;
                }
            }
            if self.thread_finished() {
                return false;
            }
            thread::sleep(PULL_BACKOFF);
        }
    }

    /// Signal the capture thread to exit and wait for it.
    ///
    /// No handler invocation happens after this returns. Later calls are no-ops.
    pub fn stop(&self) {
        let handler = {
            let mut state = self.state();
            state.slots = None;
            state.handler.take()
        };
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("capture thread for {} panicked", self.info.source);
            }
            log::info!("capture session {} stopped", self.info.source);
        }
        drop(handler);
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }

    fn thread_finished(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    // Every field is valid after a panicking handler; keep going.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn capture_loop(backend: &mut dyn CaptureBackend, state: &Mutex<SessionState>, rate: u32) {
    let mut pacer = Pacer::new(rate);
    loop {
        let grabbed = backend.grab();
        let ok = {
            let mut guard = lock_state(state);
            let SessionState {
                slots,
                frame_count,
                has_frame,
                handler,
            } = &mut *guard;
            let Some(slots) = slots.as_mut() else {
                break;
            };
            *frame_count += 1;

            let mut ok = grabbed;
            if ok {
                let frame = slots.standby_mut();
                match backend.retrieve(frame) {
                    Ok(()) => frame.sequence = *frame_count,
                    Err(err) => {
                        log::debug!("{}: retrieve failed: {:#}", backend.describe(), err);
                        ok = false;
                    }
                }
            }
            if ok {
                if let Some(handler) = handler.as_mut() {
                    if let Err(err) = handler.handle(slots.standby()) {
                        log::debug!("{}: frame handler failed: {:#}", backend.describe(), err);
                        ok = false;
                    }
                }
                // The retrieved frame is complete whatever the handler said.
                slots.publish();
                *has_frame = true;
            }
            if !ok {
                *frame_count = 0;
            }
            ok
        };

        if !ok {
            log::debug!("{}: rewinding after failed frame", backend.describe());
            if let Err(err) = backend.seek_to_start() {
                log::warn!("{}: seek to start failed: {:#}", backend.describe(), err);
            }
        }
        pacer.wait_next();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
