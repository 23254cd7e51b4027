use thiserror::Error;

/// Validation failures detected while resolving a render request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("missing required query parameter `{param}`")]
    MissingParameter { param: &'static str },
    #[error("unsupported format `{value}`")]
    UnsupportedFormat { value: String },
}

impl DomainError {
    pub fn missing(param: &'static str) -> Self {
        Self::MissingParameter { param }
    }

    pub fn unsupported_format(value: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            value: value.into(),
        }
    }
}
