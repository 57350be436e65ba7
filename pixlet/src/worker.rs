//! Compute worker: a dedicated thread that owns the session.
//!
//! The worker blocks on its request channel and processes one request at a
//! time. Decode and filter calls occupy the thread for their whole duration;
//! the controller never waits on them because every reply goes back over the
//! response channel.

use std::io;
use std::str::FromStr;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::arena::{DEFAULT_ARENA_LIMIT, ScratchArena};
use crate::bridge::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::bridge::protocol::{ErrorKind, WorkerRequest, WorkerResponse};
use crate::controller::WorkerHandle;
use crate::engine::raster::DEFAULT_MAX_SURFACE_BYTES;
use crate::engine::{EngineError, ImageEngine, RasterEngine};
use crate::session::{Outbox, Session, SessionError, SessionState};

pub const ENV_ARENA_LIMIT: &str = "PIXLET_ARENA_LIMIT_BYTES";
pub const ENV_MAX_SURFACE: &str = "PIXLET_MAX_SURFACE_BYTES";
pub const ENV_MAX_FRAME: &str = "PIXLET_MAX_FRAME_BYTES";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scratch arena budget in bytes.
    pub arena_limit: usize,
    /// Largest decoded surface the default engine accepts.
    pub max_surface_bytes: u64,
    /// Largest frame accepted on framed transports.
    pub max_frame_bytes: usize,
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            arena_limit: DEFAULT_ARENA_LIMIT,
            max_surface_bytes: DEFAULT_MAX_SURFACE_BYTES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            thread_name: "pixlet-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Defaults overridden by `PIXLET_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, ENV_ARENA_LIMIT) {
            config.arena_limit = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_SURFACE) {
            config.max_surface_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_FRAME) {
            config.max_frame_bytes = v;
        }
        config
    }

    pub fn with_arena_limit(mut self, bytes: usize) -> Self {
        self.arena_limit = bytes;
        self
    }

    pub fn with_max_surface_bytes(mut self, bytes: u64) -> Self {
        self.max_surface_bytes = bytes;
        self
    }

    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}

/// Sends responses back to the controller.
///
/// A closed channel means the controller is gone; responses are then dropped.
pub struct ResponseSender {
    tx: mpsc::UnboundedSender<WorkerResponse>,
}

impl ResponseSender {
    pub fn new(tx: mpsc::UnboundedSender<WorkerResponse>) -> Self {
        Self { tx }
    }
}

impl Outbox for ResponseSender {
    fn post(&mut self, response: WorkerResponse) {
        if self.tx.send(response).is_err() {
            tracing::debug!("Response channel closed, dropping response");
        }
    }
}

/// An item on the worker's request channel.
///
/// Transports that parse requests themselves forward bodies they could not
/// parse as `Rejected`, so the error reaches the controller in request order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Request(WorkerRequest),
    Rejected { kind: ErrorKind, message: String },
}

impl From<WorkerRequest> for Inbound {
    fn from(request: WorkerRequest) -> Self {
        Self::Request(request)
    }
}

/// Raw channel ends of a spawned worker.
pub(crate) struct WorkerChannels {
    pub request_tx: mpsc::UnboundedSender<Inbound>,
    pub response_rx: mpsc::UnboundedReceiver<WorkerResponse>,
    pub thread: JoinHandle<()>,
}

pub(crate) fn spawn_channels<E, F>(config: &WorkerConfig, make_engine: F) -> io::Result<WorkerChannels>
where
    E: ImageEngine + 'static,
    F: FnOnce() -> Result<E, EngineError> + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let arena_limit = config.arena_limit;

    let thread = std::thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || run_worker(arena_limit, make_engine, request_rx, response_tx))?;

    tracing::debug!(thread = %config.thread_name, arena_limit, "Spawned worker thread");
    Ok(WorkerChannels {
        request_tx,
        response_rx,
        thread,
    })
}

/// Spawn a worker whose engine is built on the worker thread by `make_engine`.
pub fn spawn_worker<E, F>(config: &WorkerConfig, make_engine: F) -> io::Result<WorkerHandle>
where
    E: ImageEngine + 'static,
    F: FnOnce() -> Result<E, EngineError> + Send + 'static,
{
    spawn_channels(config, make_engine).map(WorkerHandle::new)
}

/// Spawn a worker backed by the default [`RasterEngine`].
pub fn spawn_raster_worker(config: &WorkerConfig) -> io::Result<WorkerHandle> {
    spawn_worker(config, raster_factory(config.max_surface_bytes))
}

pub(crate) fn raster_factory(
    max_surface_bytes: u64,
) -> impl FnOnce() -> Result<RasterEngine, EngineError> + Send + 'static {
    move || Ok(RasterEngine::new().with_max_surface_bytes(max_surface_bytes))
}

fn run_worker<E, F>(
    arena_limit: usize,
    make_engine: F,
    mut requests: mpsc::UnboundedReceiver<Inbound>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
) where
    E: ImageEngine,
    F: FnOnce() -> Result<E, EngineError>,
{
    let mut outbox = ResponseSender::new(responses);
    let mut session = Session::new(ScratchArena::new(arena_limit));

    let engine = match make_engine() {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Engine initialization failed, worker exiting");
            outbox.post(WorkerResponse::error(ErrorKind::EngineInit, e.to_string()));
            return;
        }
    };

    // Requests queued while the engine was starting reach an uninitialized session.
    while let Ok(inbound) = requests.try_recv() {
        dispatch(&mut session, inbound, &mut outbox);
    }

    session.initialize(engine);
    outbox.post(WorkerResponse::Ready);

    while let Some(inbound) = requests.blocking_recv() {
        dispatch(&mut session, inbound, &mut outbox);
    }

    tracing::info!("Request channel closed, worker exiting");
}

fn dispatch<E: ImageEngine>(session: &mut Session<E>, inbound: Inbound, outbox: &mut ResponseSender) {
    let request = match inbound {
        Inbound::Request(request) => request,
        Inbound::Rejected { kind, message } => {
            if session.state() == SessionState::Uninitialized {
                tracing::warn!(error_kind = %kind, "Unparseable request received before worker was ready, dropping");
            } else {
                tracing::warn!(error_kind = %kind, error = %message, "Rejected unparseable request");
                outbox.post(WorkerResponse::error(kind, message));
            }
            return;
        }
    };
    let kind = request.kind();
    tracing::trace!(?kind, state = %session.state(), "Handling request");

    match session.handle(request, outbox) {
        Ok(()) => {}
        Err(SessionError::NotReady) => {
            tracing::warn!(?kind, "Request received before worker was ready, dropping");
        }
        Err(e) => {
            tracing::warn!(?kind, error_kind = %e.kind(), error = %e, "Request failed");
            outbox.post(e.to_response());
        }
    }
}
