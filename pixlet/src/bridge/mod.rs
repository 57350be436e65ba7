//! Message bridge between the controller and the compute worker.
//!
//! # Architecture
//!
//! - **protocol**: Message types (WorkerRequest/WorkerResponse, ErrorKind)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **transport**: serve a worker over a framed byte stream (stdio)

pub mod codec;
pub mod protocol;
pub mod transport;
