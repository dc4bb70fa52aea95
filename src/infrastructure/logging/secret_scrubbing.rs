//! Scrubs API keys, bearer tokens, and password-like fields out of log
//! messages before they reach stdout or a log file.

use regex::Regex;
use std::fmt;
use tracing::Subscriber;
use tracing_subscriber::Layer;

#[derive(Clone)]
pub struct SecretScrubbingLayer {
    api_key_pattern: Regex,
    token_pattern: Regex,
    bearer_pattern: Regex,
    password_pattern: Regex,
}

impl SecretScrubbingLayer {
    pub fn new() -> Self {
        Self {
            api_key_pattern: Regex::new(r"sk-ant-[a-zA-Z0-9-_]{20,}").unwrap(),
            token_pattern: Regex::new(
                r#"["']?(?:api_key|apikey|token|secret)["']?\s*[:=]\s*["']?([a-zA-Z0-9-_.]{20,})["']?"#,
            )
            .unwrap(),
            bearer_pattern: Regex::new(r"Bearer\s+[a-zA-Z0-9-_.]+").unwrap(),
            password_pattern: Regex::new(r#"["']?password["']?\s*[:=]\s*["']?([^"'\s,}]+)["']?"#).unwrap(),
        }
    }

    pub fn scrub_message(&self, message: &str) -> String {
        let mut scrubbed = self.api_key_pattern.replace_all(message, "[API_KEY_REDACTED]").to_string();
        scrubbed = self.bearer_pattern.replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]").to_string();
        scrubbed = self
            .token_pattern
            .replace_all(&scrubbed, |caps: &regex::Captures| {
                let full_match = &caps[0];
                if let Some(colon_pos) = full_match.find(':') {
                    format!("{}:[REDACTED]", &full_match[..colon_pos])
                } else if let Some(eq_pos) = full_match.find('=') {
                    format!("{}=[REDACTED]", &full_match[..eq_pos])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        self.password_pattern.replace_all(&scrubbed, "password=[REDACTED]").to_string()
    }
}

impl Default for SecretScrubbingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretScrubbingLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretScrubbingLayer").finish()
    }
}

// Full event-formatting interception would require a custom visitor; this
// layer currently exposes `scrub_message` for callers (e.g. audit log
// writers) that format their own strings before emitting them.
impl<S: Subscriber> Layer<S> for SecretScrubbingLayer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_anthropic_api_keys() {
        let layer = SecretScrubbingLayer::new();
        let msg = "using key sk-ant-REDACTED";
        assert!(!layer.scrub_message(msg).contains("sk-ant-api03"));
    }

    #[test]
    fn scrubs_bearer_tokens() {
        let layer = SecretScrubbingLayer::new();
        let msg = "Authorization: Bearer abc123def456ghi789";
        assert!(layer.scrub_message(msg).contains("[TOKEN_REDACTED]"));
    }

    #[test]
    fn scrubs_password_fields() {
        let layer = SecretScrubbingLayer::new();
        let msg = r#"password: "hunter2""#;
        assert!(layer.scrub_message(msg).contains("[REDACTED]"));
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        let layer = SecretScrubbingLayer::new();
        let msg = "task completed successfully";
        assert_eq!(layer.scrub_message(msg), msg);
    }
}
