//! Wire protocol types for controller-worker communication.
//!
//! Both directions share one ordered channel. Requests are fire-and-forget;
//! every response arrives out of band in the order the worker produced it.

use serde::{Deserialize, Serialize};

use crate::engine::FilterKind;
use crate::transfer::{EncodedPayload, ResultBuffer};

/// Messages from controller to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Decode an encoded image and make it the current surface.
    LoadImage { payload: EncodedPayload },

    ApplyFilter {
        #[serde(rename = "filterKind")]
        filter_kind: FilterKind,
        intensity: f32,
    },
}

impl WorkerRequest {
    pub fn load(payload: impl Into<Vec<u8>>) -> Self {
        Self::LoadImage {
            payload: EncodedPayload::new(payload),
        }
    }

    pub fn filter(filter_kind: FilterKind, intensity: f32) -> Self {
        Self::ApplyFilter {
            filter_kind,
            intensity,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::LoadImage { .. } => RequestKind::Load,
            Self::ApplyFilter { .. } => RequestKind::Filter,
        }
    }

    /// Error category for a request body that failed to parse, chosen by its
    /// `type` tag. Bodies with no recognizable tag count as undecodable input.
    pub fn rejection_kind(tag: Option<&str>) -> ErrorKind {
        match tag {
            Some("APPLY_FILTER") => ErrorKind::Filter,
            _ => ErrorKind::Decode,
        }
    }
}

/// Request category, used to match responses to in-flight requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Load,
    Filter,
}

/// Messages from worker to controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    /// Engine instantiated; requests are accepted from now on.
    Ready,

    ImageLoaded { width: u32, height: u32 },

    /// Owned snapshot of the current surface.
    Render {
        pixels: ResultBuffer,
        width: u32,
        height: u32,
    },

    /// Filter completed. The RENDER for it has already been sent.
    FilterDone,

    Log { message: String },

    Error { kind: ErrorKind, message: String },
}

impl WorkerResponse {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Whether this response finishes the oldest in-flight request of `kind`.
    pub fn completes(&self, kind: RequestKind) -> bool {
        match (self, kind) {
            (Self::Error { .. }, _) => true,
            (Self::Render { .. }, RequestKind::Load) => true,
            (Self::FilterDone, RequestKind::Filter) => true,
            _ => false,
        }
    }
}

/// Failure category carried by ERROR messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Allocation,
    Decode,
    NoImageLoaded,
    Filter,
    NotReady,
    EngineInit,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allocation => "allocation",
            Self::Decode => "decode",
            Self::NoImageLoaded => "no_image_loaded",
            Self::Filter => "filter",
            Self::NotReady => "not_ready",
            Self::EngineInit => "engine_init",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_image_serializes() {
        let req = WorkerRequest::load(b"PNG".to_vec());
        insta::assert_json_snapshot!(req, @r#"
        {
          "type": "LOAD_IMAGE",
          "payload": "UE5H"
        }
        "#);
    }

    #[test]
    fn apply_filter_serializes() {
        let req = WorkerRequest::filter(FilterKind::EdgeDetect, 0.5);
        insta::assert_json_snapshot!(req, @r#"
        {
          "type": "APPLY_FILTER",
          "filterKind": "edge_detect",
          "intensity": 0.5
        }
        "#);
    }

    #[test]
    fn ready_serializes() {
        insta::assert_json_snapshot!(WorkerResponse::Ready, @r#"
        {
          "type": "READY"
        }
        "#);
    }

    #[test]
    fn image_loaded_serializes() {
        let resp = WorkerResponse::ImageLoaded {
            width: 2,
            height: 2,
        };
        insta::assert_json_snapshot!(resp, @r#"
        {
          "type": "IMAGE_LOADED",
          "width": 2,
          "height": 2
        }
        "#);
    }

    #[test]
    fn render_serializes() {
        let resp: WorkerResponse = serde_json::from_value(serde_json::json!({
            "type": "RENDER",
            "pixels": "/wAA/w==",
            "width": 1,
            "height": 1,
        }))
        .unwrap();
        insta::assert_json_snapshot!(resp, @r#"
        {
          "type": "RENDER",
          "pixels": "/wAA/w==",
          "width": 1,
          "height": 1
        }
        "#);
    }

    #[test]
    fn filter_done_serializes() {
        insta::assert_json_snapshot!(WorkerResponse::FilterDone, @r#"
        {
          "type": "FILTER_DONE"
        }
        "#);
    }

    #[test]
    fn error_serializes() {
        let resp = WorkerResponse::error(ErrorKind::NoImageLoaded, "no image loaded");
        insta::assert_json_snapshot!(resp, @r#"
        {
          "type": "ERROR",
          "kind": "no_image_loaded",
          "message": "no image loaded"
        }
        "#);
    }

    #[test]
    fn unknown_filter_kind_is_rejected() {
        let parsed = serde_json::from_str::<WorkerRequest>(
            r#"{"type":"APPLY_FILTER","filterKind":"sepia","intensity":1.0}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn rejected_bodies_map_to_their_request_context() {
        assert_eq!(
            WorkerRequest::rejection_kind(Some("APPLY_FILTER")),
            ErrorKind::Filter
        );
        assert_eq!(
            WorkerRequest::rejection_kind(Some("LOAD_IMAGE")),
            ErrorKind::Decode
        );
        assert_eq!(WorkerRequest::rejection_kind(Some("RESIZE")), ErrorKind::Decode);
        assert_eq!(WorkerRequest::rejection_kind(None), ErrorKind::Decode);
    }

    #[test]
    fn completion_rules() {
        let render = WorkerResponse::Render {
            pixels: serde_json::from_str(r#""AAAAAA==""#).unwrap(),
            width: 1,
            height: 1,
        };
        let error = WorkerResponse::error(ErrorKind::Decode, "bad");

        assert!(render.completes(RequestKind::Load));
        assert!(!render.completes(RequestKind::Filter));
        assert!(WorkerResponse::FilterDone.completes(RequestKind::Filter));
        assert!(error.completes(RequestKind::Load));
        assert!(error.completes(RequestKind::Filter));
        assert!(!WorkerResponse::log("hi").completes(RequestKind::Load));
        assert!(!WorkerResponse::ImageLoaded { width: 1, height: 1 }.completes(RequestKind::Load));
    }

    #[test]
    fn error_kind_display_matches_wire_name() {
        for kind in [
            ErrorKind::Allocation,
            ErrorKind::Decode,
            ErrorKind::NoImageLoaded,
            ErrorKind::Filter,
            ErrorKind::NotReady,
            ErrorKind::EngineInit,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.to_string())
            );
        }
    }
}
