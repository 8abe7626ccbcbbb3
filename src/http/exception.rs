use crate::error::Error;
use crate::guard::GuardError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// A failure carrying the HTTP status it should be answered with.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        error_body(self.status, self.message)
    }
}

/// Render the failure of a unit of work as `{statusCode, message, timestamp}`.
///
/// Failures the runtime does not recognise are answered with a generic 500;
/// their details only go to the log.
pub fn render_error(error: &anyhow::Error) -> Response {
    let (status, message) = if let Some(e) = error.downcast_ref::<HttpError>() {
        (e.status, e.message.clone())
    } else if let Some(e) = error.downcast_ref::<GuardError>() {
        match e {
            GuardError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, e.to_string()),
            GuardError::Forbidden(_) => (StatusCode::FORBIDDEN, e.to_string()),
        }
    } else if let Some(e) = error.downcast_ref::<Error>() {
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = ?error, "Request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %error, "Request rejected");
    }
    error_body(status, message)
}

fn error_body(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(json!({
            "statusCode": status.as_u16(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn guard_denials_map_to_auth_statuses() {
        let response = render_error(&GuardError::Unauthorized("no token".into()).into());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = render_error(&GuardError::Forbidden("admins only".into()).into());
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_of(response).await;
        assert_eq!(body["statusCode"], 403);
        assert_eq!(body["message"], "Forbidden: admins only");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unknown_failures_hide_their_details() {
        let response = render_error(&anyhow::anyhow!("connection string leaked"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await["message"], "Internal Server Error");
    }

    #[tokio::test]
    async fn http_errors_keep_their_status() {
        let response = render_error(&HttpError::not_found("user 9 not found").into());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await["message"], "user 9 not found");
    }
}
