//! Request-level error taxonomy.
//!
//! Every variant is terminal for the single request that produced it. None of
//! them is retried and none of them stops the application; they are surfaced
//! either as a blocking alert (missing input) or as a system message in the
//! transcript.

use thiserror::Error;

/// Which outbound call a result belongs to. The user-visible wording differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Send,
    Verify,
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// No API key entered. Blocks the action with an alert.
    #[error("Please enter an API key first!")]
    UserInputMissing,

    /// The server answered with an `error` payload.
    #[error("{0}")]
    Api(String),

    /// No candidates came back, usually because of the safety filter.
    #[error("No response from model. This usually happens if the prompt is blocked by safety filters.")]
    EmptyOrBlocked,

    #[error(transparent)]
    Network(#[from] reqwest::Error),

    /// The body was not a reply object we understand.
    #[error("unrecognized response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ChatError {
    /// Text for the transcript's system channel.
    pub fn system_message(&self, kind: RequestKind) -> String {
        match (self, kind) {
            (ChatError::Api(message), RequestKind::Send) => format!("Error: {message}"),
            (ChatError::Api(message), RequestKind::Verify) => {
                format!("Verification Error: {message}")
            }
            (ChatError::EmptyOrBlocked, RequestKind::Send) => self.to_string(),
            (ChatError::EmptyOrBlocked, RequestKind::Verify) => {
                format!("Verification Error: {self}")
            }
            (ChatError::Network(_) | ChatError::Decode(_), RequestKind::Send) => {
                format!("Failed to connect: {self}")
            }
            (ChatError::Network(_) | ChatError::Decode(_), RequestKind::Verify) => {
                format!("Connection Failed: {self}")
            }
            (ChatError::UserInputMissing, _) => self.to_string(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, ChatError::UserInputMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_are_prefixed_per_request_kind() {
        let err = ChatError::Api("invalid key".to_string());
        assert_eq!(err.system_message(RequestKind::Send), "Error: invalid key");
        assert_eq!(
            err.system_message(RequestKind::Verify),
            "Verification Error: invalid key"
        );
    }

    #[test]
    fn decode_failures_read_as_connection_failures() {
        let err: ChatError = serde_json::from_str::<serde_json::Value>("not json")
            .unwrap_err()
            .into();
        assert!(err.system_message(RequestKind::Send).starts_with("Failed to connect: "));
        assert!(err.system_message(RequestKind::Verify).starts_with("Connection Failed: "));
    }

    #[test]
    fn only_missing_input_blocks() {
        assert!(ChatError::UserInputMissing.is_blocking());
        assert!(!ChatError::EmptyOrBlocked.is_blocking());
    }
}
