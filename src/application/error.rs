use std::{borrow::Cow, error::Error as StdError};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{
        artifact::ArtifactError,
        pool::PoolError,
        render::{ErrorKind, RenderError},
    },
    infra::error::InfraError,
};

const RENDER_SOURCE: &str = "application::render::RenderService";

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// An error response: a status, a public body (possibly empty) and the
/// private report.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: Cow<'static, str>,
    report: ErrorReport,
}

impl HttpError {
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message: public_message.into(),
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message.into_owned()).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        match error.kind() {
            ErrorKind::BadRequest => {
                let message = error.to_string();
                HttpError::from_error(RENDER_SOURCE, StatusCode::BAD_REQUEST, message, &error)
            }
            // The body of a failed navigation is deliberately empty.
            ErrorKind::NotFound => {
                HttpError::from_error(RENDER_SOURCE, StatusCode::NOT_FOUND, "", &error)
            }
            ErrorKind::PoolUnavailable => HttpError::from_error(
                RENDER_SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is shutting down",
                &error,
            ),
            ErrorKind::Timeout => HttpError::from_error(
                RENDER_SOURCE,
                StatusCode::GATEWAY_TIMEOUT,
                "Rendering timed out",
                &error,
            ),
            ErrorKind::Unhandled => HttpError::from_error(
                RENDER_SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

/// Failures that stop the process rather than a single request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
