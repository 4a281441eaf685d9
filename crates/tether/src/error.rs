//! Engine error types.

use crate::pipeline::PipelineErrorCode;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no stream endpoints available")]
    NoEndpointsAvailable,

    #[error("all {total} stream endpoints failed")]
    EndpointsExhausted { total: usize },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("playback error ({code}): {message}")]
    Pipeline {
        code: PipelineErrorCode,
        message: String,
    },
}

impl EngineError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn pipeline(code: PipelineErrorCode, message: impl Into<String>) -> Self {
        Self::Pipeline {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_message() {
        let err = EngineError::pipeline(PipelineErrorCode::DecoderInit, "no hevc decoder");
        assert_eq!(
            err.to_string(),
            "playback error (decoder_init): no hevc decoder"
        );
    }

    #[test]
    fn exhaustion_messages() {
        assert_eq!(
            EngineError::NoEndpointsAvailable.to_string(),
            "no stream endpoints available"
        );
        assert_eq!(
            EngineError::EndpointsExhausted { total: 3 }.to_string(),
            "all 3 stream endpoints failed"
        );
    }
}
