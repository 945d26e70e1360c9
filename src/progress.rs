use serde::{Deserialize, Serialize};

/// Typed progress record flowed from an adapter to the orchestrator.
///
/// The `stage_progress` .. `warning` variants match the JSON records the
/// drapto encoder writes to stdout one per line; the `ripping_*` variants
/// are produced by the MakeMKV output parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RippingProgress {
        stage: String,
        percent: f32,
    },
    RippingStatus {
        message: String,
    },
    StageProgress {
        stage: String,
        percent: f32,
        #[serde(default)]
        message: String,
    },
    EncodingProgress {
        percent: f32,
        #[serde(default)]
        speed: f32,
        #[serde(default)]
        fps: f32,
        #[serde(default)]
        eta_seconds: u64,
    },
    EncodingComplete {
        #[serde(default)]
        size_reduction_percent: f32,
    },
    ValidationComplete {
        validation_passed: bool,
    },
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
}

impl ProgressEvent {
    /// Stage label and percent if this event moves a progress bar.
    pub fn as_progress(&self) -> Option<(&str, f32)> {
        match self {
            ProgressEvent::RippingProgress { stage, percent } => Some((stage, *percent)),
            ProgressEvent::StageProgress { stage, percent, .. } => Some((stage, *percent)),
            ProgressEvent::EncodingProgress { percent, .. } => Some(("encoding", *percent)),
            _ => None,
        }
    }

    /// Human message if this event carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            ProgressEvent::RippingStatus { message }
            | ProgressEvent::Error { message }
            | ProgressEvent::Warning { message } => Some(message),
            ProgressEvent::StageProgress { message, .. } if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}
