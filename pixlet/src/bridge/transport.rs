//! Serve a worker over a framed byte stream.
//!
//! Requests are read from `reader` as length-delimited JSON frames and
//! forwarded to a freshly spawned worker; every response is written back to
//! `writer` in the order the worker produced it. Used by `pixlet serve` over
//! stdin/stdout, and by tests over in-memory duplex pipes.
//!
//! A frame whose body does not parse is answered with ERROR (`filter` for an
//! APPLY_FILTER body, `decode` otherwise) and serving continues. Only a
//! framing error stops reading; responses already queued are still written.

use std::io;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::{FrameTooLarge, JsonCodec};
use super::protocol::{ErrorKind, WorkerRequest, WorkerResponse};
use crate::worker::{Inbound, WorkerChannels, WorkerConfig, raster_factory, spawn_channels};

/// Run a worker until `reader` reaches EOF and every response is written.
///
/// Returns the framing or write error that ended the session, if any.
pub async fn serve_framed<R, W>(reader: R, writer: W, config: &WorkerConfig) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut requests = FramedRead::new(
        reader,
        JsonCodec::<WorkerRequest>::with_max_frame_length(config.max_frame_bytes),
    );
    let mut writer = ResponseWriter {
        frames: FramedWrite::new(
            writer,
            JsonCodec::<WorkerResponse>::with_max_frame_length(config.max_frame_bytes),
        ),
        render_dropped: false,
    };

    let WorkerChannels {
        request_tx,
        mut response_rx,
        thread,
    } = spawn_channels(config, raster_factory(config.max_surface_bytes))?;
    let mut request_tx = Some(request_tx);
    let mut failure: Option<io::Error> = None;

    loop {
        tokio::select! {
            frame = requests.next(), if request_tx.is_some() => {
                match frame {
                    Some(Ok(Ok(request))) => forward(&mut request_tx, Inbound::Request(request)),
                    Some(Ok(Err(malformed))) => {
                        let kind = WorkerRequest::rejection_kind(malformed.tag.as_deref());
                        forward(
                            &mut request_tx,
                            Inbound::Rejected {
                                kind,
                                message: malformed.to_string(),
                            },
                        );
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Request stream error, draining worker");
                        failure = Some(e);
                        request_tx = None;
                    }
                    None => {
                        tracing::debug!("Request stream closed, draining worker");
                        request_tx = None;
                    }
                }
            }

            response = response_rx.recv() => {
                let Some(response) = response else { break };
                if let Err(e) = writer.write(response).await {
                    tracing::error!(error = %e, "Failed to write response");
                    failure = Some(e);
                    break;
                }
            }
        }
    }

    drop(request_tx);
    drop(response_rx);
    tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_err(io::Error::other)?
        .map_err(|_| io::Error::other("worker thread panicked"))?;
    failure.map_or(Ok(()), Err)
}

fn forward(request_tx: &mut Option<mpsc::UnboundedSender<Inbound>>, inbound: Inbound) {
    let closed = match request_tx {
        Some(tx) => tx.send(inbound).is_err(),
        None => true,
    };
    if closed {
        tracing::warn!("Worker stopped accepting requests");
        *request_tx = None;
    }
}

struct ResponseWriter<W> {
    frames: FramedWrite<W, JsonCodec<WorkerResponse>>,
    /// The last RENDER did not fit in a frame and was replaced by ERROR.
    render_dropped: bool,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    /// Write one response. A RENDER too large for a frame becomes ERROR
    /// `allocation`, and the FILTER_DONE that follows it is withheld so the
    /// filter completes exactly once.
    async fn write(&mut self, response: WorkerResponse) -> io::Result<()> {
        let render_dropped = std::mem::take(&mut self.render_dropped);
        if render_dropped && response == WorkerResponse::FilterDone {
            tracing::debug!("Withholding FILTER_DONE for a render that was not delivered");
            return Ok(());
        }

        let is_render = matches!(response, WorkerResponse::Render { .. });
        match self.frames.send(response).await {
            Err(e) if is_render && FrameTooLarge::is_cause_of(&e) => {
                tracing::warn!(error = %e, "Render exceeds frame limit");
                self.render_dropped = true;
                self.frames
                    .send(WorkerResponse::error(ErrorKind::Allocation, e.to_string()))
                    .await
            }
            other => other,
        }
    }
}
