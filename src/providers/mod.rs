//! 提供方接口：语言模型、语音转写、语音合成与向量嵌入。
//!
//! Provider seams.
//!
//! Every external collaborator is reached through one of these traits. The crate does
//! not speak any vendor wire format itself; applications implement the traits over
//! their SDK or HTTP client of choice and hand them to
//! [`StudyAssistant`](crate::assistant::StudyAssistant). The assistant calls them
//! under the circuit breaker, keyed by [`name`](LanguageModel::name).

mod hashing;
mod types;

pub use hashing::HashingEmbedder;
pub use types::{
    AudioFormat, AudioOutput, CompletionRequest, Message, MessageRole, SttOptions, Transcription,
    TtsOptions, Voice,
};

use crate::knowledge::Vector;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Service name used for circuit breaking and logs (e.g. "together_ai").
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &[u8], options: &SttOptions) -> Result<Transcription>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, options: &TtsOptions) -> Result<AudioOutput>;

    async fn voices(&self) -> Result<Vec<Voice>> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>>;
}
