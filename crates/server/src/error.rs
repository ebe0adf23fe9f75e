use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use intake_core::{ApplicationError, InterfaceError};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

pub fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Interface error rendered as a JSON response.
#[derive(Debug)]
pub struct HttpError(pub InterfaceError);

impl HttpError {
    pub fn new(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    pub fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_owned(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::MissingFields { .. } | InterfaceError::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (state, fields) = match &self.0 {
            InterfaceError::MissingFields { state, fields, .. } => {
                (Some(state.clone()), Some(fields.clone()))
            }
            _ => (None, None),
        };
        let retry_after_secs = match &self.0 {
            InterfaceError::TooManyRequests { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        };

        ErrorBody {
            error: self.0.code(),
            message: self.0.user_message(),
            state,
            fields,
            retry_after_secs,
            correlation_id: self.0.correlation_id().to_owned(),
        }
    }
}

/// Wire shape of every error response.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub correlation_id: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request.rejected",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request rejected"
            );
        }

        let body = self.body();
        let retry_after = body.retry_after_secs;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
