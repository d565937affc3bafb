//! Reduces a decoded reply to a rendering decision.

use crate::error::ChatError;
use crate::gemini::{ApiReply, FinishReason, Part};
use crate::transcript::{MessageId, Role, Transcript};

pub const SAFETY_WARNING: &str = "Warning: The response was blocked by safety filters.";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// The body carried an error object.
    Error(String),
    /// No candidates at all.
    Empty,
    /// Parts of the first candidate. `blocked` is set on a safety finish,
    /// which does not suppress whatever parts did arrive.
    Content { parts: Vec<Part>, blocked: bool },
}

/// Classifies a reply. Only the first candidate is ever looked at.
pub fn parse_reply(reply: ApiReply, model: &str) -> ReplyOutcome {
    if let Some(error) = reply.error {
        tracing::warn!(model, code = ?error.code, status = ?error.status, "api error: {}", error.message);
        return ReplyOutcome::Error(error.message);
    }

    let Some(candidate) = reply.candidates.and_then(|c| c.into_iter().next()) else {
        let block_reason = reply.prompt_feedback.and_then(|f| f.block_reason);
        tracing::warn!(model, ?block_reason, "reply has no candidates");
        return ReplyOutcome::Empty;
    };

    let blocked = candidate.finish_reason == Some(FinishReason::Safety);
    let parts = candidate
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default();
    tracing::info!(
        model,
        parts = parts.len(),
        finish_reason = ?candidate.finish_reason,
        "reply received"
    );

    ReplyOutcome::Content { parts, blocked }
}

/// Appends what an outcome shows to the user. Returns the ai message, if one
/// was appended.
pub fn append_outcome(transcript: &mut Transcript, outcome: ReplyOutcome) -> Option<MessageId> {
    match outcome {
        ReplyOutcome::Error(message) => {
            transcript.append_text(Role::System, format!("Error: {message}"));
            None
        }
        ReplyOutcome::Empty => {
            transcript.append_text(Role::System, ChatError::EmptyOrBlocked.to_string());
            None
        }
        ReplyOutcome::Content { parts, blocked } => {
            if blocked {
                transcript.append_text(Role::System, SAFETY_WARNING);
            }
            transcript.append_parts(&parts)
        }
    }
}

/// What a verification request echoed back.
pub fn verification_echo(reply: ApiReply, model: &str) -> Result<String, ChatError> {
    match parse_reply(reply, model) {
        ReplyOutcome::Error(message) => Err(ChatError::Api(message)),
        ReplyOutcome::Empty => Err(ChatError::EmptyOrBlocked),
        ReplyOutcome::Content { parts, .. } => Ok(parts
            .into_iter()
            .find_map(|part| match part {
                Part::Text { text } => Some(text),
                _ => None,
            })
            .unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::decode_reply;
    use crate::transcript::Body;

    const MODEL: &str = "gemini-2.5-flash-image";

    fn outcome(json: &str) -> ReplyOutcome {
        parse_reply(decode_reply(json).unwrap(), MODEL)
    }

    fn system_texts(transcript: &Transcript) -> Vec<&str> {
        transcript
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .filter_map(|m| m.plain_text())
            .collect()
    }

    #[test]
    fn error_reply_renders_one_system_message_only() {
        let mut transcript = Transcript::new();
        let ai = append_outcome(
            &mut transcript,
            outcome(r#"{"error":{"message":"invalid key"}}"#),
        );

        assert!(ai.is_none());
        assert_eq!(transcript.len(), 1);
        assert_eq!(system_texts(&transcript), vec!["Error: invalid key"]);
    }

    #[test]
    fn error_wins_over_candidates() {
        assert_eq!(
            outcome(r#"{"error":{"message":"boom"},"candidates":[{"content":{"parts":[{"text":"x"}]}}]}"#),
            ReplyOutcome::Error("boom".to_string())
        );
    }

    #[test]
    fn missing_or_empty_candidates_are_empty() {
        assert_eq!(outcome("{}"), ReplyOutcome::Empty);
        assert_eq!(outcome(r#"{"candidates":[]}"#), ReplyOutcome::Empty);

        let mut transcript = Transcript::new();
        append_outcome(&mut transcript, ReplyOutcome::Empty);
        assert_eq!(
            system_texts(&transcript),
            vec!["No response from model. This usually happens if the prompt is blocked by safety filters."]
        );
    }

    #[test]
    fn safety_block_with_parts_shows_warning_and_content() {
        let mut transcript = Transcript::new();
        let ai = append_outcome(
            &mut transcript,
            outcome(r#"{"candidates":[{"finishReason":"SAFETY","content":{"parts":[{"text":"partial"}]}}]}"#),
        );

        assert_eq!(transcript.len(), 2);
        assert_eq!(system_texts(&transcript), vec![SAFETY_WARNING]);
        let ai = transcript.get(ai.unwrap()).unwrap();
        assert_eq!(ai.role, Role::Ai);
        assert!(matches!(ai.body, Body::Rendered(_)));
    }

    #[test]
    fn safety_block_without_content_shows_only_the_warning() {
        let mut transcript = Transcript::new();
        let ai = append_outcome(
            &mut transcript,
            outcome(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#),
        );
        assert!(ai.is_none());
        assert_eq!(system_texts(&transcript), vec![SAFETY_WARNING]);
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn later_candidates_are_ignored() {
        let parsed = outcome(
            r#"{"candidates":[
                {"content":{"parts":[{"text":"first"}]}},
                {"content":{"parts":[{"text":"second"}]}}
            ]}"#,
        );
        assert_eq!(
            parsed,
            ReplyOutcome::Content {
                parts: vec![Part::text("first")],
                blocked: false
            }
        );
    }

    #[test]
    fn other_finish_reasons_do_not_warn() {
        let parsed = outcome(
            r#"{"candidates":[{"finishReason":"MAX_TOKENS","content":{"parts":[{"text":"cut"}]}}]}"#,
        );
        assert!(matches!(parsed, ReplyOutcome::Content { blocked: false, .. }));
    }

    #[test]
    fn verification_echoes_first_text_part() {
        let echo = verification_echo(
            decode_reply(r#"{"candidates":[{"content":{"parts":[{"text":"gemini-2.5-flash"}]}}]}"#)
                .unwrap(),
            MODEL,
        )
        .unwrap();
        assert_eq!(echo, "gemini-2.5-flash");
    }

    #[test]
    fn verification_surfaces_api_errors() {
        let err = verification_echo(
            decode_reply(r#"{"error":{"message":"quota"}}"#).unwrap(),
            MODEL,
        )
        .unwrap_err();
        assert!(matches!(err, ChatError::Api(ref m) if m == "quota"));
    }
}
