//! Prompt templates for study answers and session summaries.

use super::session::Conversation;
use crate::providers::{CompletionRequest, Message};

/// Exchanges replayed as chat history.
pub const HISTORY_EXCHANGES: usize = 5;
/// Exchanges included in a session summary.
pub const SUMMARY_EXCHANGES: usize = 10;
pub const SUMMARY_MAX_TOKENS: u32 = 200;

pub const STUDY_SYSTEM_PROMPT: &str = "You are a helpful AI Study Buddy. Provide clear, \
educational responses that help students learn effectively.";
pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes study sessions.";

pub const FALLBACK_RESPONSE: &str = "I'm having trouble connecting to my AI services right now. \
Please try again in a moment, or check that your API keys are properly configured.";
pub const SUMMARY_UNAVAILABLE: &str = "Study session summary unavailable at this time.";
pub const EMPTY_SESSION_SUMMARY: &str = "No conversations in this session yet.";

/// Wrap a student question with retrieved context and answering guidelines.
pub fn study_prompt(question: &str, context: &str) -> String {
    format!(
        "You are an AI Study Buddy designed to help students learn effectively. You provide \
clear, educational responses that encourage learning and understanding.

Context from previous conversations: {context}

Student's question or input: {question}

Please provide a helpful, educational response that:
1. Directly addresses the student's question
2. Explains concepts clearly and simply
3. Provides examples when helpful
4. Encourages further learning
5. Asks follow-up questions to deepen understanding

Response:"
    )
}

/// System message, the last [`HISTORY_EXCHANGES`] exchanges, then the enhanced prompt.
pub fn chat_request(question: &str, context: &str, history: &[Conversation]) -> CompletionRequest {
    let skip = history.len().saturating_sub(HISTORY_EXCHANGES);
    let mut messages = Vec::with_capacity(2 + 2 * HISTORY_EXCHANGES);
    messages.push(Message::system(STUDY_SYSTEM_PROMPT));
    for conv in &history[skip..] {
        messages.push(Message::user(conv.user_input.as_str()));
        messages.push(Message::assistant(conv.ai_response.as_str()));
    }
    messages.push(Message::user(study_prompt(question, context)));
    CompletionRequest::new(messages)
}

/// Summary request over the last [`SUMMARY_EXCHANGES`] exchanges, `None` when empty.
pub fn summary_request(history: &[Conversation]) -> Option<CompletionRequest> {
    if history.is_empty() {
        return None;
    }
    let skip = history.len().saturating_sub(SUMMARY_EXCHANGES);
    let transcript = history[skip..]
        .iter()
        .map(|c| format!("Student: {}\nAI: {}", c.user_input, c.ai_response))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Please provide a brief summary of this study session, highlighting key topics \
discussed and learning points:\n\n{}\n\nSummary:",
        transcript
    );
    Some(
        CompletionRequest::new(vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(prompt),
        ])
        .with_max_tokens(SUMMARY_MAX_TOKENS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::session::InputMethod;
    use crate::providers::MessageRole;

    fn conv(i: usize) -> Conversation {
        Conversation {
            user_input: format!("q{}", i),
            ai_response: format!("a{}", i),
            input_method: InputMethod::Text,
            audio_duration: 0.0,
            timestamp: i as f64,
        }
    }

    #[test]
    fn test_study_prompt_embeds_context_and_question() {
        let p = study_prompt("What is osmosis?", "[Biology]: water moves");
        assert!(p.contains("Context from previous conversations: [Biology]: water moves"));
        assert!(p.contains("Student's question or input: What is osmosis?"));
        assert!(p.ends_with("Response:"));
    }

    #[test]
    fn test_chat_request_keeps_last_five_exchanges() {
        let history: Vec<_> = (0..8).map(conv).collect();
        let req = chat_request("next", "", &history);
        assert_eq!(req.messages.len(), 1 + 10 + 1);
        assert_eq!(req.messages[0].role, MessageRole::System);
        assert_eq!(req.messages[1].content, "q3");
        assert_eq!(req.messages[2].role, MessageRole::Assistant);
        assert_eq!(req.messages[10].content, "a7");
        assert!(req.last_user_text().unwrap().contains("Student's question or input: next"));
        assert_eq!(req.max_tokens, 500);
    }

    #[test]
    fn test_summary_request() {
        assert!(summary_request(&[]).is_none());
        let history: Vec<_> = (0..12).map(conv).collect();
        let req = summary_request(&history).unwrap();
        let text = req.last_user_text().unwrap();
        assert!(text.contains("Student: q2\nAI: a2"));
        assert!(!text.contains("Student: q1\n"));
        assert!(text.ends_with("Summary:"));
        assert_eq!(req.max_tokens, SUMMARY_MAX_TOKENS);
    }
}
