use std::io;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("GPIO I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Direction change refused: {0}")]
    DirectionRefused(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl AppError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        AppError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::DirectionRefused(_) => StatusCode::CONFLICT,
            AppError::Io { .. } | AppError::Config(_) | AppError::Runtime(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::InvalidValue("x".into()), StatusCode::BAD_REQUEST),
            (AppError::DirectionRefused("x".into()), StatusCode::CONFLICT),
            (AppError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Runtime("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, code) in cases {
            assert_eq!(err.status_code(), code, "{err}");
        }
        assert_eq!(
            AppError::Runtime("pool gone".into()).to_string(),
            "Runtime error: pool gone"
        );
    }
}
