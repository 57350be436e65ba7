//! pixlet: off-thread image decoding and filtering.
//!
//! A controller issues fire-and-forget requests to a dedicated compute worker
//! and consumes responses as they arrive. Encoded input reaches the engine
//! through an explicitly managed scratch arena; every pixel delivery is an
//! owned copy of the engine surface.

pub mod arena;
pub mod bridge;
pub mod controller;
pub mod engine;
pub mod session;
pub mod transfer;
pub mod worker;

#[cfg(test)]
mod testing;

pub use arena::{AllocationError, ScratchArena, ScratchHandle};
pub use bridge::protocol::{ErrorKind, RequestKind, WorkerRequest, WorkerResponse};
pub use bridge::transport::serve_framed;
pub use controller::{ControllerError, WorkerHandle};
pub use engine::{
    EngineBinding, EngineError, FilterKind, ImageEngine, Intensity, PixelSurface, RasterEngine,
    SurfaceInfo, SurfaceView,
};
pub use session::{Outbox, Session, SessionError, SessionState};
pub use transfer::{EncodedPayload, ResultBuffer};
pub use worker::{WorkerConfig, spawn_raster_worker, spawn_worker};
