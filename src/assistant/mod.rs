//! 学习助手：请求分发、限流守卫与模型降级。
//!
//! # Study Assistant
//!
//! [`StudyAssistant`] is the dispatcher in front of the providers. Every request goes
//! through the [`GuardChain`] (rate limiting per client and service) before its
//! handler runs, and every provider call runs under the [`CircuitBreaker`] keyed by
//! the provider's name.
//!
//! | Request | Limiter service | Providers |
//! |---------|-----------------|-----------|
//! | `Transcribe` | `assemblyai` | [`Transcriber`] |
//! | `Synthesize` | `google_tts` | [`SpeechSynthesizer`] |
//! | `Chat`, `SessionSummary` | `general` | [`LanguageModel`]s, in order |
//! | everything else | `general` | knowledge base, sessions |
//!
//! Responses are JSON bodies with an HTTP-style status and the rate limit headers.

pub mod api;
pub mod prompt;
pub mod session;

pub use api::{ApiRequest, ApiResponse};
pub use session::{Conversation, InputMethod, SessionStore, StudySession};

use crate::clock::{Clock, SystemClock};
use crate::config::StudyConfig;
use crate::knowledge::{KnowledgeBase, NewKnowledge};
use crate::middleware::{Guard, GuardChain, RateLimitGuard, RequestContext};
use crate::providers::{
    CompletionRequest, Embedder, HashingEmbedder, LanguageModel, SpeechSynthesizer, SttOptions,
    Transcriber, TtsOptions,
};
use crate::resilience::{CircuitBreaker, GuardError, RateLimiter};
use crate::{Error, ErrorContext, Result};
use base64::Engine as _;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_TRANSCRIPTION_CONFIDENCE: f32 = 0.8;

pub struct StudyAssistant {
    config: StudyConfig,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    chain: GuardChain,
    models: Vec<Arc<dyn LanguageModel>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    knowledge: Arc<KnowledgeBase>,
    sessions: Arc<SessionStore>,
}

impl StudyAssistant {
    pub fn builder() -> StudyAssistantBuilder {
        StudyAssistantBuilder::new()
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run `request` for `client_id` through the guard chain and its handler.
    ///
    /// Never fails: every error becomes a JSON error body with its status code.
    pub async fn handle(&self, client_id: &str, request: ApiRequest) -> ApiResponse {
        let ctx = RequestContext::new(client_id, request.service()).with_operation(request.operation());
        let request_id = ctx.request_id.clone();
        let operation = request.operation();
        let guarded = self.chain.execute(ctx, move || self.dispatch(request)).await;
        let response = match guarded.result {
            Ok(response) => response,
            Err(err) => {
                if err.status_code() >= 500 {
                    tracing::error!(operation, request_id = %request_id, "request failed: {}", err);
                } else {
                    tracing::debug!(operation, request_id = %request_id, "request refused: {}", err);
                }
                ApiResponse::from_error(&err)
            }
        };
        response.with_metadata(guarded.metadata)
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
        match request {
            ApiRequest::CreateSession { session_name } => Ok(self.create_session(session_name.as_deref())),
            ApiRequest::Transcribe { audio, mime_type } => self.transcribe(audio, mime_type).await,
            ApiRequest::Synthesize { text, voice, speed } => self.synthesize(text, voice, speed).await,
            ApiRequest::Chat {
                message,
                session_id,
                input_method,
                audio_duration,
            } => self.chat(message, session_id, input_method, audio_duration).await,
            ApiRequest::SearchKnowledge { query, limit } => self.search_knowledge(query, limit).await,
            ApiRequest::AddKnowledge {
                title,
                content,
                category,
                source_url,
            } => self.add_knowledge(title, content, category, source_url).await,
            ApiRequest::SessionSummary { session_id } => self.session_summary(session_id).await,
            ApiRequest::Voices => self.voices().await,
        }
    }

    fn create_session(&self, name: Option<&str>) -> ApiResponse {
        let session = self.sessions.create(name);
        ApiResponse::ok(json!({
            "session_id": session.id,
            "session_name": session.session_name,
            "created_at": session.created_at,
            "success": true,
        }))
    }

    async fn transcribe(&self, audio: Vec<u8>, mime_type: Option<String>) -> Result<ApiResponse> {
        if audio.is_empty() {
            return Err(missing_field("audio", "No audio file provided"));
        }
        let Some(transcriber) = self.transcriber.as_ref() else {
            return Ok(unavailable("Transcription service is not configured"));
        };
        let options = SttOptions {
            language: None,
            mime_type,
        };
        let result = self
            .breaker
            .guard(transcriber.name(), || transcriber.transcribe(&audio, &options))
            .await?;
        Ok(ApiResponse::ok(json!({
            "text": result.text,
            "confidence": result.confidence.unwrap_or(DEFAULT_TRANSCRIPTION_CONFIDENCE),
            "duration": result.duration.unwrap_or(0.0),
            "success": true,
        })))
    }

    async fn synthesize(
        &self,
        text: Option<String>,
        voice: Option<String>,
        speed: Option<f32>,
    ) -> Result<ApiResponse> {
        let text = required(text, "text", "No text provided")?;
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return Ok(unavailable("Speech synthesis service is not configured"));
        };
        let mut options = TtsOptions::default();
        if let Some(voice) = voice {
            options.voice = voice;
        }
        if let Some(speed) = speed {
            options.speed = speed;
        }
        let audio = self
            .breaker
            .guard(synthesizer.name(), || synthesizer.synthesize(&text, &options))
            .await?;
        Ok(ApiResponse::ok(json!({
            "audio_data": base64::engine::general_purpose::STANDARD.encode(&audio.data),
            "format": audio.format.as_str(),
            "mime_type": audio.format.mime_type(),
            "success": true,
        })))
    }

    async fn chat(
        &self,
        message: Option<String>,
        session_id: Option<u64>,
        input_method: InputMethod,
        audio_duration: f64,
    ) -> Result<ApiResponse> {
        let message = required(message, "message", "No message provided")?;
        let session_id = session_id.ok_or_else(|| missing_field("session_id", "Session ID required"))?;
        self.sessions.get(session_id)?;

        let history = self.sessions.recent(session_id, prompt::HISTORY_EXCHANGES)?;
        let kcfg = &self.config.knowledge;
        let context = self
            .knowledge
            .context_for(&message, kcfg.context_k, kcfg.max_context_chars)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("knowledge context unavailable: {}", e);
                String::new()
            });

        let request = prompt::chat_request(&message, &context, &history);
        let Some((source, response)) = self.complete_with_fallback(&request).await else {
            return Ok(ApiResponse::with_status(
                503,
                json!({
                    "error": "AI service unavailable",
                    "fallback_response": prompt::FALLBACK_RESPONSE,
                    "source": "fallback",
                    "success": false,
                }),
            ));
        };

        let session = self
            .sessions
            .record(session_id, message.as_str(), response.as_str(), input_method, audio_duration)?;
        let recommendations = self
            .knowledge
            .recommendations(&message, kcfg.recommendation_k)
            .await
            .unwrap_or_default();

        Ok(ApiResponse::ok(json!({
            "response": response,
            "source": source,
            "recommendations": recommendations,
            "context_used": !context.is_empty(),
            "session_id": session.id,
            "total_interactions": session.total_interactions,
            "success": true,
        })))
    }

    /// First non-empty completion from the configured models, tried in order.
    ///
    /// Each call is guarded under the model's name; an empty answer counts as a failure.
    async fn complete_with_fallback(&self, request: &CompletionRequest) -> Option<(String, String)> {
        for model in &self.models {
            let name = model.name();
            let outcome = self
                .breaker
                .guard(name, || async {
                    let text = model.complete(request).await?;
                    if text.trim().is_empty() {
                        return Err(Error::upstream(name, "empty completion"));
                    }
                    Ok::<_, Error>(text)
                })
                .await;
            match outcome {
                Ok(text) => return Some((name.to_string(), text.trim().to_string())),
                Err(GuardError::Open(e)) => tracing::warn!(model = name, "skipping model: {}", e),
                Err(GuardError::Upstream(e)) => tracing::warn!(model = name, "model failed, trying next: {}", e),
            }
        }
        None
    }

    async fn search_knowledge(&self, query: Option<String>, limit: Option<usize>) -> Result<ApiResponse> {
        let query = required(query, "query", "No search query provided")?;
        let results = self
            .knowledge
            .search(&query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
            .await?;
        Ok(ApiResponse::ok(json!({
            "count": results.len(),
            "results": results,
            "query": query,
            "success": true,
        })))
    }

    async fn add_knowledge(
        &self,
        title: Option<String>,
        content: Option<String>,
        category: Option<String>,
        source_url: Option<String>,
    ) -> Result<ApiResponse> {
        let title = required_named(title, "title")?;
        let content = required_named(content, "content")?;
        let category = required_named(category, "category")?;
        let id = self
            .knowledge
            .add(NewKnowledge {
                title,
                content,
                category,
                source_url,
            })
            .await?;
        Ok(ApiResponse::ok(json!({
            "id": id,
            "message": "Knowledge added successfully",
            "success": true,
        })))
    }

    async fn session_summary(&self, session_id: u64) -> Result<ApiResponse> {
        let session = self.sessions.get(session_id)?;
        let history = self.sessions.history(session_id)?;
        let summary = match prompt::summary_request(&history) {
            None => prompt::EMPTY_SESSION_SUMMARY.to_string(),
            Some(request) => match self.complete_with_fallback(&request).await {
                Some((_, text)) => text,
                None => prompt::SUMMARY_UNAVAILABLE.to_string(),
            },
        };
        Ok(ApiResponse::ok(json!({
            "session_id": session.id,
            "session_name": session.session_name,
            "total_interactions": session.total_interactions,
            "summary": summary,
            "conversation_count": history.len(),
            "created_at": session.created_at,
            "success": true,
        })))
    }

    async fn voices(&self) -> Result<ApiResponse> {
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return Ok(unavailable("Speech synthesis service is not configured"));
        };
        let voices = self
            .breaker
            .guard(synthesizer.name(), || synthesizer.voices())
            .await?;
        Ok(ApiResponse::ok(json!({
            "voices": voices,
            "success": true,
        })))
    }
}

fn missing_field(field: &str, message: &str) -> Error {
    Error::validation_with_context(
        message,
        ErrorContext::new().with_field_path(field).with_source("assistant"),
    )
}

fn required(value: Option<String>, field: &str, message: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(missing_field(field, message)),
    }
}

fn required_named(value: Option<String>, field: &str) -> Result<String> {
    required(value, field, &format!("Missing required field: {}", field))
}

fn unavailable(message: &str) -> ApiResponse {
    ApiResponse::with_status(503, json!({ "error": message, "success": false }))
}

/// Builder for [`StudyAssistant`].
///
/// Only the language models are usually supplied; everything else has an offline
/// default (system clock, hashing embedder, default configuration).
pub struct StudyAssistantBuilder {
    config: StudyConfig,
    clock: Arc<dyn Clock>,
    models: Vec<Arc<dyn LanguageModel>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    embedder: Option<Arc<dyn Embedder>>,
    guards: Vec<Arc<dyn Guard>>,
}

impl StudyAssistantBuilder {
    pub fn new() -> Self {
        Self {
            config: StudyConfig::default(),
            clock: Arc::new(SystemClock),
            models: Vec::new(),
            transcriber: None,
            synthesizer: None,
            embedder: None,
            guards: Vec::new(),
        }
    }

    pub fn config(mut self, config: StudyConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock shared by the limiter, the breaker and the session store.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Append a language model; models are tried in the order they were added.
    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.models.push(model);
        self
    }

    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Extra guard run after rate limiting.
    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub async fn build(self) -> Result<StudyAssistant> {
        self.config.validate()?;
        let limiter = Arc::new(RateLimiter::with_clock(
            self.config.rate_limits.clone(),
            self.clock.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::with_clock(
            self.config.circuit_breaker.clone(),
            self.clock.clone(),
        ));
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashingEmbedder::default()));
        let knowledge = Arc::new(KnowledgeBase::new(embedder));
        if self.config.knowledge.seed_defaults {
            let seeded = knowledge.seed_defaults().await?;
            tracing::debug!(seeded, embedder = knowledge.embedder_name(), "seeded default knowledge");
        }

        let chain = self
            .guards
            .into_iter()
            .fold(GuardChain::new().with(RateLimitGuard::new(limiter.clone())), |chain, g| chain.add(g));

        if self.models.is_empty() {
            tracing::warn!("no language models configured; chat will use the fallback response");
        }
        Ok(StudyAssistant {
            config: self.config,
            limiter,
            breaker,
            chain,
            models: self.models,
            transcriber: self.transcriber,
            synthesizer: self.synthesizer,
            knowledge,
            sessions: Arc::new(SessionStore::with_clock(self.clock)),
        })
    }
}

impl Default for StudyAssistantBuilder {
    fn default() -> Self {
        Self::new()
    }
}
