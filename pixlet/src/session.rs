//! Worker session state machine.
//!
//! ```text
//! Uninitialized --(engine instantiated)--> Ready
//! Ready         --(LOAD ok)-------------> ImageLoaded
//! ImageLoaded   --(LOAD ok)-------------> ImageLoaded (surface replaced)
//! ```
//!
//! Failed requests never move the session: a failed LOAD leaves the previous
//! surface in place and a failed filter leaves the session in ImageLoaded.

use serde::{Deserialize, Serialize};

use crate::arena::{AllocationError, ScratchArena};
use crate::bridge::protocol::{ErrorKind, WorkerRequest, WorkerResponse};
use crate::engine::{EngineBinding, EngineError, FilterKind, ImageEngine, SurfaceView};
use crate::transfer::{self, EncodedPayload};

/// Lifecycle state of the worker session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Engine not yet instantiated
    #[default]
    Uninitialized,
    /// Engine ready, no image loaded
    Ready,
    /// A decoded surface is available
    ImageLoaded,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Ready => "READY",
            Self::ImageLoaded => "IMAGE_LOADED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("worker is not ready")]
    NotReady,

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("no image loaded")]
    NoImageLoaded,

    #[error("invalid filter request: {0}")]
    Filter(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady => ErrorKind::NotReady,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::Decode(_) => ErrorKind::Decode,
            Self::NoImageLoaded => ErrorKind::NoImageLoaded,
            Self::Filter(_) => ErrorKind::Filter,
        }
    }

    pub fn to_response(&self) -> WorkerResponse {
        WorkerResponse::error(self.kind(), self.to_string())
    }
}

impl From<AllocationError> for SessionError {
    fn from(e: AllocationError) -> Self {
        SessionError::Allocation(e.to_string())
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Decode(msg) => SessionError::Decode(msg),
            EngineError::NoImageLoaded => SessionError::NoImageLoaded,
            EngineError::Filter(msg) => SessionError::Filter(msg),
            EngineError::Allocation(msg) => SessionError::Allocation(msg),
        }
    }
}

/// Destination for responses produced while handling a request.
pub trait Outbox {
    fn post(&mut self, response: WorkerResponse);
}

impl Outbox for Vec<WorkerResponse> {
    fn post(&mut self, response: WorkerResponse) {
        self.push(response);
    }
}

/// Per-worker session: owns the scratch arena and the engine binding.
pub struct Session<E> {
    state: SessionState,
    arena: ScratchArena,
    binding: Option<EngineBinding<E>>,
}

impl<E: ImageEngine> Session<E> {
    pub fn new(arena: ScratchArena) -> Self {
        Self {
            state: SessionState::Uninitialized,
            arena,
            binding: None,
        }
    }

    /// Install the engine. Uninitialized -> Ready.
    pub fn initialize(&mut self, engine: E) {
        if self.binding.is_some() {
            tracing::warn!(state = %self.state, "Session already initialized, replacing engine");
        }
        self.binding = Some(EngineBinding::new(engine));
        self.state = SessionState::Ready;
        tracing::info!("Session ready");
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn arena(&self) -> &ScratchArena {
        &self.arena
    }

    /// Current surface, available only once an image is loaded.
    pub fn surface(&self) -> Option<SurfaceView<'_>> {
        match self.state {
            SessionState::ImageLoaded => self.binding.as_ref()?.surface_info(),
            _ => None,
        }
    }

    /// Handle one request, posting every success response to `outbox`.
    ///
    /// Errors are returned rather than posted so the caller decides how each
    /// is reported.
    pub fn handle(
        &mut self,
        request: WorkerRequest,
        outbox: &mut impl Outbox,
    ) -> Result<(), SessionError> {
        match request {
            WorkerRequest::LoadImage { payload } => self.load(&payload, outbox),
            WorkerRequest::ApplyFilter {
                filter_kind,
                intensity,
            } => self.filter(filter_kind, intensity, outbox),
        }
    }

    fn load(&mut self, payload: &EncodedPayload, outbox: &mut impl Outbox) -> Result<(), SessionError> {
        let binding = match (self.state, self.binding.as_mut()) {
            (SessionState::Uninitialized, _) | (_, None) => return Err(SessionError::NotReady),
            (_, Some(binding)) => binding,
        };
        if payload.is_empty() {
            return Err(SessionError::Decode("empty payload".to_string()));
        }

        let handle = self.arena.acquire(payload.len())?;
        let decoded = match self.arena.fill(handle, payload.as_bytes()) {
            Ok(()) => binding
                .decode(&self.arena, handle, payload.len())
                .map_err(SessionError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = self.arena.release(handle) {
            tracing::warn!(%handle, error = %e, "Failed to release scratch region");
        }
        let info = decoded?;

        self.state = SessionState::ImageLoaded;
        tracing::info!(width = info.width, height = info.height, "Image loaded");

        outbox.post(WorkerResponse::log(format!(
            "Loaded image {}x{} (RGBA)",
            info.width, info.height
        )));
        outbox.post(WorkerResponse::ImageLoaded {
            width: info.width,
            height: info.height,
        });
        let view = binding.surface_info().ok_or(SessionError::NoImageLoaded)?;
        outbox.post(transfer::render(&view)?);
        Ok(())
    }

    fn filter(
        &mut self,
        kind: FilterKind,
        intensity: f32,
        outbox: &mut impl Outbox,
    ) -> Result<(), SessionError> {
        let binding = match (self.state, self.binding.as_mut()) {
            (SessionState::Uninitialized, _) | (_, None) => return Err(SessionError::NotReady),
            (SessionState::Ready, _) => return Err(SessionError::NoImageLoaded),
            (SessionState::ImageLoaded, Some(binding)) => binding,
        };

        binding.apply_filter(kind, intensity)?;

        let view = binding.surface_info().ok_or(SessionError::NoImageLoaded)?;
        outbox.post(transfer::render(&view)?);
        outbox.post(WorkerResponse::FilterDone);
        Ok(())
    }
}
