//! Controller-side handle to a running worker.
//!
//! Flow:
//! 1. Spawn the worker (see [`crate::worker::spawn_worker`])
//! 2. Wait for READY
//! 3. Send requests without waiting; they queue in order on the worker
//! 4. Consume responses as they arrive
//!
//! Sending never blocks. Receiving is async and yields while the worker is
//! busy decoding or filtering.

use std::collections::VecDeque;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::bridge::protocol::{ErrorKind, RequestKind, WorkerRequest, WorkerResponse};
use crate::engine::FilterKind;
use crate::worker::{Inbound, WorkerChannels};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("worker has not announced READY")]
    NotReady,
    #[error("worker channel closed")]
    Disconnected,
    #[error("engine initialization failed: {0}")]
    EngineInit(String),
    #[error("worker thread panicked")]
    WorkerPanicked,
}

pub struct WorkerHandle {
    request_tx: Option<mpsc::UnboundedSender<Inbound>>,
    response_rx: mpsc::UnboundedReceiver<WorkerResponse>,
    thread: Option<JoinHandle<()>>,
    ready: bool,
    pending: VecDeque<RequestKind>,
}

impl WorkerHandle {
    pub(crate) fn new(channels: WorkerChannels) -> Self {
        Self {
            request_tx: Some(channels.request_tx),
            response_rx: channels.response_rx,
            thread: Some(channels.thread),
            ready: false,
            pending: VecDeque::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Requests sent but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Wait until the worker announces READY.
    ///
    /// Anything other than READY or an engine failure received before it is
    /// logged and discarded.
    pub async fn wait_ready(&mut self) -> Result<(), ControllerError> {
        while !self.ready {
            match self.recv().await {
                Some(WorkerResponse::Ready) => {}
                Some(WorkerResponse::Error {
                    kind: ErrorKind::EngineInit,
                    message,
                }) => return Err(ControllerError::EngineInit(message)),
                Some(other) => {
                    tracing::debug!(response = ?other, "Discarding response received before READY");
                }
                None => return Err(ControllerError::Disconnected),
            }
        }
        Ok(())
    }

    /// Queue a request on the worker. Never blocks.
    pub fn send(&mut self, request: WorkerRequest) -> Result<(), ControllerError> {
        if !self.ready {
            return Err(ControllerError::NotReady);
        }
        let tx = self.request_tx.as_ref().ok_or(ControllerError::Disconnected)?;
        let kind = request.kind();
        tx.send(Inbound::Request(request))
            .map_err(|_| ControllerError::Disconnected)?;
        self.pending.push_back(kind);
        tracing::trace!(?kind, in_flight = self.pending.len(), "Request sent");
        Ok(())
    }

    pub fn load_image(&mut self, encoded: impl Into<Vec<u8>>) -> Result<(), ControllerError> {
        self.send(WorkerRequest::load(encoded))
    }

    pub fn apply_filter(&mut self, kind: FilterKind, intensity: f32) -> Result<(), ControllerError> {
        self.send(WorkerRequest::filter(kind, intensity))
    }

    /// Next response from the worker, or `None` once the worker has exited.
    pub async fn recv(&mut self) -> Option<WorkerResponse> {
        let response = self.response_rx.recv().await?;
        match &response {
            WorkerResponse::Ready => {
                tracing::info!("Worker ready");
                self.ready = true;
            }
            other => {
                if let Some(&front) = self.pending.front()
                    && other.completes(front)
                {
                    self.pending.pop_front();
                }
            }
        }
        Some(response)
    }

    /// Close the request channel and wait for the worker thread to exit.
    ///
    /// Requests already queued are still processed first; their responses are
    /// discarded.
    pub async fn shutdown(mut self) -> Result<(), ControllerError> {
        self.request_tx.take();
        self.response_rx.close();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| ControllerError::WorkerPanicked)?
            .map_err(|_| ControllerError::WorkerPanicked)?;
        tracing::debug!("Worker thread joined");
        Ok(())
    }
}
