use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("cannot identify image file: {0}")]
    InvalidImage(#[source] image::ImageError),

    #[error("image has no pixels")]
    EmptyImage,

    #[error("image size must be between 1 and {max} pixels, got {size}")]
    InvalidSize { size: u32, max: u32 },

    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),
}

/// Any failure while talking to or interpreting the generation service.
///
/// The message is the flattened cause chain so callers can surface it as-is.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GenerationError {
    message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_chain(err: &anyhow::Error) -> Self {
        Self::new(error_chain_text(err, 1024))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid size parameter {raw:?}: {source}")]
    InvalidSizeParam {
        raw: String,
        #[source]
        source: ParseIntError,
    },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Stable Diffusion API error: {0}")]
    Generation(#[from] GenerationError),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl PipelineError {
    pub fn not_an_image() -> Self {
        Self::Validation("File must be an image".to_string())
    }

    /// Errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{truncate_text, GenerationError, PipelineError};

    #[test]
    fn generation_error_flattens_cause_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("ModelsLab request failed")
            .unwrap_err();
        let flattened = GenerationError::from_chain(&err);
        assert_eq!(
            flattened.message(),
            "ModelsLab request failed | caused by: connection refused"
        );
    }

    #[test]
    fn generation_error_skips_repeated_causes() {
        let err = Err::<(), _>(anyhow::anyhow!("timeout"))
            .context("timeout")
            .unwrap_err();
        assert_eq!(GenerationError::from_chain(&err).message(), "timeout");
    }

    #[test]
    fn pipeline_generation_errors_carry_the_service_prefix() {
        let err = PipelineError::from(GenerationError::new("Invalid API key"));
        assert_eq!(err.to_string(), "Stable Diffusion API error: Invalid API key");
        assert!(!err.is_client_error());
        assert!(PipelineError::not_an_image().is_client_error());
    }

    #[test]
    fn truncation_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
