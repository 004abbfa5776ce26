// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("no route for host: {0}")]
    NoRoute(String),
    #[error("enclave transport error: {0}")]
    EnclaveTransport(String),
    #[error("enclave call timed out")]
    EnclaveTimeout,
    #[error("internal server error")]
    InternalServerError,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MissingField(_) | Self::ValidationError(_) | Self::InvalidUrl(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Self::NoRoute(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::EnclaveTransport(_) | Self::EnclaveTimeout => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            Self::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            ),
        };

        // Transport failures mimic the enclave envelope so callers parse
        // one shape; everything else uses the plain code/message form.
        let body = match &self {
            Self::EnclaveTransport(_) | Self::EnclaveTimeout => {
                Json(json!({"success": false, "error": message}))
            }
            _ => Json(json!({"code": status.as_u16(), "message": message})),
        };

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("{:?}", source);
        AppError::InternalServerError
    }
}

impl From<std::io::Error> for AppError {
    fn from(source: std::io::Error) -> Self {
        tracing::error!("{:?}", source);
        AppError::InternalServerError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_errors_use_the_envelope_shape() {
        let response = AppError::EnclaveTransport("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn missing_field_is_a_400_with_code_message() {
        let response = AppError::MissingField("url").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 400);
        assert!(json["message"].as_str().unwrap().contains("url"));
    }
}
