//! Buffers that cross the worker boundary.
//!
//! Nothing that crosses the channel borrows worker memory. Inbound payloads are
//! owned by the request; outbound pixels are copied out of the engine surface
//! into a fresh [`ResultBuffer`] whose ownership moves with the message.
//! On byte-stream transports both serialize as base64 strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::arena::AllocationError;
use crate::bridge::protocol::WorkerResponse;
use crate::engine::SurfaceView;

/// Encoded image bytes for a single LOAD request.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct EncodedPayload(Vec<u8>);

impl EncodedPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncodedPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for EncodedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedPayload({} bytes)", self.0.len())
    }
}

impl Serialize for EncodedPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for EncodedPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        base64_bytes::deserialize(deserializer).map(Self)
    }
}

/// Independently owned snapshot of a pixel surface.
#[derive(Clone, PartialEq, Eq)]
pub struct ResultBuffer(Vec<u8>);

impl ResultBuffer {
    /// Copy the surface bytes into a freshly allocated buffer.
    pub fn copy_out(view: &SurfaceView<'_>) -> Result<Self, AllocationError> {
        let pixels = view.pixels();
        let mut buf = Vec::new();
        buf.try_reserve_exact(pixels.len())
            .map_err(|_| AllocationError::OutOfMemory {
                requested: pixels.len(),
            })?;
        buf.extend_from_slice(pixels);
        Ok(Self(buf))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl std::fmt::Debug for ResultBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResultBuffer({} bytes)", self.0.len())
    }
}

impl Serialize for ResultBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for ResultBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        base64_bytes::deserialize(deserializer).map(Self)
    }
}

/// Build a RENDER message from the current surface.
pub fn render(view: &SurfaceView<'_>) -> Result<WorkerResponse, AllocationError> {
    let pixels = ResultBuffer::copy_out(view)?;
    tracing::trace!(
        width = view.width(),
        height = view.height(),
        bytes = pixels.len(),
        "Copied surface for render"
    );
    Ok(WorkerResponse::Render {
        pixels,
        width: view.width(),
        height: view.height(),
    })
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PixelSurface;

    #[test]
    fn copy_out_is_independent_of_the_surface() {
        let mut surface = PixelSurface::from_raw(1, 1, vec![1, 2, 3, 4]).unwrap();
        let copy = ResultBuffer::copy_out(&surface.view()).unwrap();

        surface.pixels_mut().copy_from_slice(&[9, 9, 9, 9]);

        assert_eq!(copy.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(surface.view().pixels(), &[9, 9, 9, 9]);
    }

    #[test]
    fn render_length_matches_dimensions() {
        let surface = PixelSurface::from_raw(3, 2, vec![7; 24]).unwrap();
        match render(&surface.view()).unwrap() {
            WorkerResponse::Render {
                pixels,
                width,
                height,
            } => {
                assert_eq!((width, height), (3, 2));
                assert_eq!(pixels.len(), 3 * 2 * 4);
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn buffers_serialize_as_base64() {
        let payload = EncodedPayload::new(b"PNG".to_vec());
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#""UE5H""#);

        let buf: ResultBuffer = serde_json::from_str(r#""/wAA/w==""#).unwrap();
        assert_eq!(buf.as_slice(), &[255, 0, 0, 255]);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(serde_json::from_str::<EncodedPayload>(r#""not base64!""#).is_err());
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let buf = ResultBuffer(vec![0; 1024]);
        assert_eq!(format!("{buf:?}"), "ResultBuffer(1024 bytes)");
    }
}
