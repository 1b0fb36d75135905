use crate::error::SessionError;
use serde::{Deserialize, Serialize};

/// Sample rates the provider accepts.
const SUPPORTED_SAMPLE_RATES: &[u32] = &[8_000, 16_000, 24_000, 44_100, 48_000];

/// Model identifiers the provider accepts.
const SUPPORTED_MODELS: &[&str] = &["nova-2", "nova-3", "base", "enhanced"];

/// Immutable per-session configuration, fixed at creation time.
///
/// Unrecognized values are rejected when the session is created rather than
/// silently defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Audio sample rate in Hz (16 kHz 16-bit mono is the usual input)
    pub sample_rate: u32,

    /// BCP-47 language tag, e.g. "en-US"
    pub language: String,

    /// Provider model identifier, e.g. "nova-2"
    pub model: String,
}

impl SessionConfig {
    /// Reject unrecognized configuration values.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(SessionError::InvalidConfig(format!(
                "unsupported sample rate: {}",
                self.sample_rate
            )));
        }

        let tag_ok = !self.language.is_empty()
            && self
                .language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !tag_ok {
            return Err(SessionError::InvalidConfig(format!(
                "invalid language tag: {:?}",
                self.language
            )));
        }

        if !SUPPORTED_MODELS.contains(&self.model.as_str()) {
            return Err(SessionError::InvalidConfig(format!(
                "unknown model: {:?}",
                self.model
            )));
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            language: "en-US".to_string(),
            model: "nova-2".to_string(),
        }
    }
}
