//! Request and response envelopes of the study assistant API.

use crate::error::Error;
use crate::middleware::ResponseMetadata;
use crate::resilience::rate_limiter::DEFAULT_SERVICE;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::session::InputMethod;

/// Rate limit bucket for speech-to-text.
pub const TRANSCRIBE_SERVICE: &str = "assemblyai";
/// Rate limit bucket for text-to-speech.
pub const SYNTHESIZE_SERVICE: &str = "google_tts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiRequest {
    CreateSession {
        #[serde(default)]
        session_name: Option<String>,
    },
    Transcribe {
        #[serde(default)]
        audio: Vec<u8>,
        #[serde(default)]
        mime_type: Option<String>,
    },
    Synthesize {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        speed: Option<f32>,
    },
    Chat {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        session_id: Option<u64>,
        #[serde(default)]
        input_method: InputMethod,
        #[serde(default)]
        audio_duration: f64,
    },
    SearchKnowledge {
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    AddKnowledge {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        source_url: Option<String>,
    },
    SessionSummary {
        session_id: u64,
    },
    Voices,
}

impl ApiRequest {
    /// Endpoint name used in logs.
    pub fn operation(&self) -> &'static str {
        match self {
            ApiRequest::CreateSession { .. } => "create_session",
            ApiRequest::Transcribe { .. } => "transcribe",
            ApiRequest::Synthesize { .. } => "synthesize",
            ApiRequest::Chat { .. } => "chat",
            ApiRequest::SearchKnowledge { .. } => "search_knowledge",
            ApiRequest::AddKnowledge { .. } => "add_knowledge",
            ApiRequest::SessionSummary { .. } => "session_summary",
            ApiRequest::Voices => "voices",
        }
    }

    /// Rate limit service the request is accounted against.
    pub fn service(&self) -> &'static str {
        match self {
            ApiRequest::Transcribe { .. } => TRANSCRIBE_SERVICE,
            ApiRequest::Synthesize { .. } => SYNTHESIZE_SERVICE,
            _ => DEFAULT_SERVICE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    pub headers: HeaderMap,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: HeaderMap::new(),
        }
    }

    /// JSON error body for `err`, with the status it maps to.
    pub fn from_error(err: &Error) -> Self {
        let body = match err {
            Error::RateLimited(e) => json!({
                "error": "Rate limit exceeded",
                "service": e.service,
                "retry_after": e.retry_after,
                "reset_time": e.reset_at,
                "success": false,
            }),
            Error::CircuitOpen(e) => json!({
                "error": "Service temporarily unavailable",
                "service": e.service,
                "retry_after": e.retry_after,
                "success": false,
            }),
            Error::Validation { message, .. } | Error::NotFound { message, .. } => json!({
                "error": message,
                "success": false,
            }),
            other => json!({
                "error": other.to_string(),
                "success": false,
            }),
        };
        Self::with_status(err.status_code(), body)
    }

    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.headers.extend(metadata.into_headers());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
