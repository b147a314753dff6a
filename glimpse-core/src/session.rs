//! Session lifecycle and bootstrap orchestration.
//!
//! A [`SessionController`] owns one mirroring attempt at a time. Each
//! attempt is identified by a monotonically increasing epoch; every
//! asynchronous continuation compares its captured epoch against the
//! current one before mutating shared state, so callbacks from a
//! superseded attempt are discarded instead of applied.
//!
//! Bring-up sequence (§ one attempt):
//!
//! 1. fetch the agent payload
//! 2. push it to the fixed device path
//! 3. start the device-side agent
//! 4. open the control / video / log streams
//! 5. wire the video pipeline and the log pump, go to `Streaming`
//!
//! A failure at any step moves the session to `Error` with a
//! human-readable message; a retry tears the previous attempt down
//! completely before the new one touches shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::control::{ControlChannel, PERMISSION_DENIED_MARKER};
use crate::device::{
    AGENT_ARTIFACT, AGENT_DEVICE_PATH, AGENT_VERSION, AgentConfig, ByteReader, DeviceLink,
    PayloadSource, payload_digest,
};
use crate::error::GlimpseError;
use crate::geometry::VideoGeometry;
use crate::input::InputMapper;
use crate::video::{DecodedFrame, PipelineStats, VideoDecoder, VideoPipeline};

// ── SessionPhase ─────────────────────────────────────────────────

/// The lifecycle phase of the mirroring session.
///
/// ```text
///  Idle ──► Bootstrapping ──► Streaming
///               │  ▲              │
///               ▼  │ (retry)      │
///             Error ◄─────────────┘
///
///  any ──► Closed   (terminal, absorbing)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No attempt started yet.
    #[default]
    Idle,

    /// Bring-up sequence in progress.
    Bootstrapping,

    /// Video and control are live.
    Streaming,

    /// The current attempt failed; retry starts a fresh one.
    Error { message: String },

    /// Torn down. No further phase mutation is permitted.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Bootstrapping => write!(f, "Bootstrapping"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Error { .. } => write!(f, "Error"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The failure message, if the session is in `Error`.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Bootstrapping` (initial start or retry).
    ///
    /// Valid from every phase except `Closed`.
    pub fn begin_bootstrap(&mut self) -> Result<(), GlimpseError> {
        match self {
            Self::Closed => Err(GlimpseError::InvalidTransition(
                "cannot bootstrap: session is closed",
            )),
            _ => {
                *self = Self::Bootstrapping;
                Ok(())
            }
        }
    }

    /// Transition to `Streaming`.
    ///
    /// Valid from: `Bootstrapping`.
    pub fn complete_bootstrap(&mut self) -> Result<(), GlimpseError> {
        match self {
            Self::Bootstrapping => {
                *self = Self::Streaming;
                Ok(())
            }
            _ => Err(GlimpseError::InvalidTransition(
                "cannot stream: not in Bootstrapping state",
            )),
        }
    }

    /// Transition to `Error`.
    ///
    /// Valid from: `Bootstrapping`, `Streaming`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), GlimpseError> {
        match self {
            Self::Bootstrapping | Self::Streaming => {
                *self = Self::Error {
                    message: message.into(),
                };
                Ok(())
            }
            _ => Err(GlimpseError::InvalidTransition(
                "cannot fail: not in Bootstrapping or Streaming state",
            )),
        }
    }

    /// Transition to `Closed`. Valid from any phase; idempotent.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

// ── Shared session state ─────────────────────────────────────────

/// Decoder construction, deferred so each attempt gets a fresh decoder.
pub type DecoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn VideoDecoder>, GlimpseError> + Send + Sync>;

struct Shared {
    phase: SessionPhase,
    /// Monotonic attempt identifier; stale callbacks are discarded.
    epoch: u64,
    permission_warning: bool,
    control: Option<Arc<tokio::sync::Mutex<ControlChannel>>>,
    geometry_rx: Option<watch::Receiver<Option<VideoGeometry>>>,
    frame_rx: Option<watch::Receiver<Option<DecodedFrame>>>,
    stats_rx: Option<watch::Receiver<PipelineStats>>,
    pipeline_stop: Option<Arc<AtomicBool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            epoch: 0,
            permission_warning: false,
            control: None,
            geometry_rx: None,
            frame_rx: None,
            stats_rx: None,
            pipeline_stop: None,
            tasks: Vec::new(),
        }
    }

    /// Detach the live resources of the current attempt for disposal.
    fn take_resources(&mut self) -> Resources {
        self.geometry_rx = None;
        self.frame_rx = None;
        self.stats_rx = None;
        Resources {
            control: self.control.take(),
            pipeline_stop: self.pipeline_stop.take(),
            tasks: std::mem::take(&mut self.tasks),
        }
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A poisoned lock still holds consistent state here; recover it.
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resources of one attempt, disposed exactly once during teardown.
struct Resources {
    control: Option<Arc<tokio::sync::Mutex<ControlChannel>>>,
    pipeline_stop: Option<Arc<AtomicBool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Resources {
    /// Idempotent teardown: stop the pumps, await their cancellation,
    /// close the control channel. Errors are swallowed.
    async fn dispose(mut self) {
        if let Some(stop) = self.pipeline_stop.take() {
            stop.store(false, Ordering::SeqCst);
        }
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(control) = self.control.take() {
            control.lock().await.close().await;
        }
    }
}

// ── SessionController ────────────────────────────────────────────

/// Orchestrates the mirroring session against the device collaborators.
///
/// At most one attempt is live at any time; [`start`](Self::start)
/// supersedes and disposes the previous one before its own side
/// effects are applied.
pub struct SessionController {
    link: Arc<dyn DeviceLink>,
    payloads: Arc<dyn PayloadSource>,
    decoders: DecoderFactory,
    config: AgentConfig,
    shared: Arc<Mutex<Shared>>,
}

impl SessionController {
    pub fn new(
        link: Arc<dyn DeviceLink>,
        payloads: Arc<dyn PayloadSource>,
        decoders: DecoderFactory,
        config: AgentConfig,
    ) -> Self {
        Self {
            link,
            payloads,
            decoders,
            config,
            shared: Arc::new(Mutex::new(Shared::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase.clone()
    }

    /// The current attempt's epoch (0 before the first start).
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Whether the device reported a restricted injection permission.
    pub fn permission_warning(&self) -> bool {
        self.lock().permission_warning
    }

    /// Dismiss the permission warning. Does not touch the phase.
    pub fn dismiss_permission_warning(&self) {
        self.lock().permission_warning = false;
    }

    /// Geometry updates of the live attempt, if streaming.
    pub fn geometry_receiver(&self) -> Option<watch::Receiver<Option<VideoGeometry>>> {
        self.lock().geometry_rx.clone()
    }

    /// Decoded frames of the live attempt, if streaming.
    pub fn frame_receiver(&self) -> Option<watch::Receiver<Option<DecodedFrame>>> {
        self.lock().frame_rx.clone()
    }

    /// Pipeline statistics of the live attempt, if streaming.
    pub fn stats_receiver(&self) -> Option<watch::Receiver<PipelineStats>> {
        self.lock().stats_rx.clone()
    }

    /// An input mapper bound to the live attempt's control channel.
    pub fn input_mapper(&self) -> Option<InputMapper> {
        let s = self.lock();
        match (&s.control, &s.geometry_rx) {
            (Some(control), Some(geometry)) => {
                Some(InputMapper::new(Arc::clone(control), geometry.clone()))
            }
            _ => None,
        }
    }

    /// Begin a fresh attempt, superseding and disposing the previous
    /// one. Bootstrap failures are recorded in the session phase, not
    /// returned. No-op once the session is closed.
    pub async fn start(&self) {
        let (token, previous) = {
            let mut s = self.lock();
            if s.phase.begin_bootstrap().is_err() {
                return; // closed
            }
            s.epoch += 1;
            s.permission_warning = false;
            (s.epoch, s.take_resources())
        };

        // The previous decoder and channel must be gone before this
        // attempt produces any side effects.
        previous.dispose().await;
        info!("session attempt {token}: bootstrapping");

        match self.bring_up(token).await {
            Ok(()) => {}
            Err(GlimpseError::StaleAttempt) => debug!("attempt {token} superseded"),
            Err(e) => {
                warn!("attempt {token} failed: {e}");
                let mut s = self.lock();
                if s.epoch == token && !s.phase.is_closed() {
                    let _ = s.phase.fail(e.to_string());
                }
            }
        }
    }

    /// User-facing retry: identical to [`start`](Self::start).
    pub async fn retry(&self) {
        self.start().await;
    }

    /// Tear the session down and move to the terminal `Closed` phase.
    /// Idempotent; never fails.
    pub async fn close(&self) {
        let resources = {
            let mut s = self.lock();
            s.phase.close();
            s.take_resources()
        };
        resources.dispose().await;
        info!("session closed");
    }

    // ── Internal ─────────────────────────────────────────────────

    fn is_current(&self, token: u64) -> bool {
        let s = self.lock();
        s.epoch == token && !s.phase.is_closed()
    }

    fn ensure_current(&self, token: u64) -> Result<(), GlimpseError> {
        if self.is_current(token) {
            Ok(())
        } else {
            Err(GlimpseError::StaleAttempt)
        }
    }

    async fn bring_up(&self, token: u64) -> Result<(), GlimpseError> {
        // 1. Fetch the agent payload.
        let payload = match self.payloads.fetch(AGENT_ARTIFACT).await {
            Ok(p) => p,
            Err(e @ GlimpseError::Fetch(_)) => return Err(e),
            Err(e) => return Err(GlimpseError::Fetch(e.to_string())),
        };
        self.ensure_current(token)?;

        // 2. Push it to the fixed device path.
        info!(
            digest = %payload_digest(&payload),
            bytes = payload.len(),
            "pushing agent payload"
        );
        match self.link.push(AGENT_DEVICE_PATH, payload).await {
            Ok(()) => {}
            Err(e @ GlimpseError::Push(_)) => return Err(e),
            Err(e) => return Err(GlimpseError::Push(e.to_string())),
        }
        self.ensure_current(token)?;

        // 3. Start the agent and obtain its streams.
        info!(version = AGENT_VERSION, "starting device agent");
        let streams = match self.link.start_agent(AGENT_DEVICE_PATH, &self.config).await {
            Ok(s) => s,
            Err(e @ GlimpseError::AgentStart(_)) => return Err(e),
            Err(e) => return Err(GlimpseError::AgentStart(e.to_string())),
        };

        // 4. Superseded while the streams were opening: close what was
        //    opened, leave shared state untouched.
        if !self.is_current(token) {
            ControlChannel::new(streams.control).close().await;
            return Err(GlimpseError::StaleAttempt);
        }

        // 5. Wire the pipeline and the log pump.
        let decoder = (self.decoders)()?;
        let mut pipeline = VideoPipeline::new(decoder);
        let geometry_rx = pipeline.geometry_receiver();
        let frame_rx = pipeline.frame_receiver();
        let stats_rx = pipeline.stats_receiver();
        let stop = pipeline.stop_handle();

        let control = Arc::new(tokio::sync::Mutex::new(ControlChannel::new(
            streams.control,
        )));
        let log_task = tokio::spawn(Self::pump_log(streams.log, Arc::clone(&self.shared), token));

        let video = streams.video;
        let video_shared = Arc::clone(&self.shared);
        let video_task = tokio::spawn(async move {
            match pipeline.run(video).await {
                Ok(()) => info!("video stream ended"),
                Err(e) => {
                    // The stream itself is unusable; surface it.
                    warn!("video pipeline failed: {e}");
                    let mut s = lock_shared(&video_shared);
                    if s.epoch == token && s.phase.is_streaming() {
                        let _ = s.phase.fail(format!("video stream failed: {e}"));
                    }
                }
            }
        });

        // Scoped so the guard never spans the stale-path await below;
        // holding it there would make this future non-Send.
        {
            let mut s = self.lock();
            if s.epoch == token && !s.phase.is_closed() {
                s.control = Some(control);
                s.geometry_rx = Some(geometry_rx);
                s.frame_rx = Some(frame_rx);
                s.stats_rx = Some(stats_rx);
                s.pipeline_stop = Some(stop);
                s.tasks = vec![log_task, video_task];
                s.phase.complete_bootstrap()?;
                info!("session attempt {token}: streaming");
                return Ok(());
            }
        }
        stop.store(false, Ordering::SeqCst);
        Resources {
            control: Some(control),
            pipeline_stop: None,
            tasks: vec![log_task, video_task],
        }
        .dispose()
        .await;
        Err(GlimpseError::StaleAttempt)
    }

    /// Pump the agent's diagnostic log stream; a line containing the
    /// permission marker raises the (epoch-gated) warning flag.
    async fn pump_log(log: ByteReader, shared: Arc<Mutex<Shared>>, token: u64) {
        let mut lines = FramedRead::new(log, LinesCodec::new_with_max_length(8 * 1024));
        while let Some(item) = lines.next().await {
            let line = match item {
                Ok(line) => line,
                Err(e) => {
                    warn!("agent log stream error: {e}");
                    break;
                }
            };
            debug!("agent: {line}");
            if line.contains(PERMISSION_DENIED_MARKER) {
                let mut s = lock_shared(&shared);
                if s.epoch == token && !s.phase.is_closed() {
                    warn!("input injection restricted on device");
                    s.permission_warning = true;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
