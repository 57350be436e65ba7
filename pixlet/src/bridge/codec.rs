//! Length-delimited JSON frames.
//!
//! Each frame is a 4-byte big-endian length followed by one JSON message.
//! Framing errors (a length beyond the limit, a truncated stream) are I/O
//! errors and end the stream. A well-framed body that does not parse as the
//! expected message is yielded as a [`MalformedFrame`] so the caller can
//! report it and keep reading.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Default maximum frame length (768 MiB).
///
/// A RENDER carries the surface as base64, so this covers the largest default
/// surface (512 MiB of RGBA) plus the JSON envelope.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 768 * 1024 * 1024;

/// Frames above this size are logged at debug level.
const LARGE_FRAME_BYTES: usize = 1024 * 1024;

/// A frame whose body is not a valid message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {} frame: {message}", .tag.as_deref().unwrap_or("untagged"))]
pub struct MalformedFrame {
    /// The `type` field of the body, when the body is a JSON object that has one.
    pub tag: Option<String>,
    pub message: String,
}

/// An encoded message exceeded the frame limit. Nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("encoded message is {len} bytes, frame limit is {max}")]
pub struct FrameTooLarge {
    pub len: usize,
    pub max: usize,
}

impl FrameTooLarge {
    /// Whether `err` was produced by an oversized encode.
    pub fn is_cause_of(err: &io::Error) -> bool {
        err.get_ref().is_some_and(|inner| inner.is::<FrameTooLarge>())
    }
}

/// Frames messages of type `T` as length-delimited JSON.
///
/// Decoding yields `Result<T, MalformedFrame>`: only framing problems surface
/// as `io::Error`.
pub struct JsonCodec<T> {
    framing: LengthDelimitedCodec,
    max_frame_length: usize,
    _message: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max)
                .new_codec(),
            max_frame_length: max,
            _message: PhantomData,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

fn body_tag(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("type")?.as_str().map(str::to_owned)
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = Result<T, MalformedFrame>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(body) = self.framing.decode(src)? else {
            return Ok(None);
        };

        match serde_json::from_slice(&body) {
            Ok(message) => Ok(Some(Ok(message))),
            Err(e) => {
                let malformed = MalformedFrame {
                    tag: body_tag(&body),
                    message: e.to_string(),
                };
                tracing::debug!(
                    frame_bytes = body.len(),
                    tag = ?malformed.tag,
                    error = %malformed.message,
                    "Malformed frame body"
                );
                Ok(Some(Err(malformed)))
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, message: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if body.len() > self.max_frame_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                FrameTooLarge {
                    len: body.len(),
                    max: self.max_frame_length,
                },
            ));
        }
        if body.len() > LARGE_FRAME_BYTES {
            tracing::debug!(frame_kb = body.len() / 1024, "Encoding large frame");
        }

        self.framing.encode(Bytes::from(body), dst)
    }
}
