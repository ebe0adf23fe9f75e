use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("invalid value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldValue { field: field.into(), reason: reason.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("rate limit exceeded for {bucket}")]
    RateLimited { bucket: String, retry_after_secs: u64 },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("upstream delivery failure: {0}")]
    Upstream(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("missing required fields for {state}: {fields:?}")]
    MissingFields { state: String, fields: Vec<String>, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("too many requests")]
    TooManyRequests { retry_after_secs: u64, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingFields { .. } => "Some required answers are missing for this step.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested resource was not found.",
            Self::TooManyRequests { .. } => "Too many requests. Please slow down and retry.",
            Self::Unauthorized { .. } => "Authentication is required or has expired.",
            Self::Conflict { .. } => "Another operation is already in progress for this resource.",
            Self::BadGateway { .. } => "An upstream service failed. Please retry shortly.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields { .. } => "missing_fields",
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::TooManyRequests { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Conflict { .. } => "conflict",
            Self::BadGateway { .. } => "upstream_failure",
            Self::ServiceUnavailable { .. } => "unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::MissingFields { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn correlation_id_mut(&mut self) -> &mut String {
        match self {
            Self::MissingFields { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        *mapped.correlation_id_mut() = correlation_id.into();
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::FlowTransition(
                FlowTransitionError::MissingRequiredFields { state, missing_fields },
            )) => Self::MissingFields {
                state: state.as_str().to_owned(),
                fields: missing_fields,
                correlation_id,
            },
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::NotFound { entity, id } => {
                Self::NotFound { message: format!("{entity} {id}"), correlation_id }
            }
            ApplicationError::RateLimited { retry_after_secs, .. } => {
                Self::TooManyRequests { retry_after_secs, correlation_id }
            }
            ApplicationError::Unauthorized(message) => {
                Self::Unauthorized { message, correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Upstream(message) => Self::BadGateway { message, correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::flows::{FlowTransitionError, IntakeState};

    #[test]
    fn missing_fields_keep_state_and_field_list() {
        let interface = ApplicationError::from(DomainError::from(
            FlowTransitionError::MissingRequiredFields {
                state: IntakeState::Scheduling,
                missing_fields: vec!["timezone".to_owned()],
            },
        ))
        .into_interface("req-1");

        assert_eq!(
            interface,
            InterfaceError::MissingFields {
                state: "SCHEDULING".to_owned(),
                fields: vec!["timezone".to_owned()],
                correlation_id: "req-1".to_owned(),
            }
        );
        assert_eq!(interface.code(), "missing_fields");
    }

    #[test]
    fn invalid_value_maps_to_bad_request_with_user_safe_message() {
        let interface =
            ApplicationError::from(DomainError::invalid("sender_type", "unknown role"))
                .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn upstream_failure_maps_to_bad_gateway() {
        let interface =
            ApplicationError::Upstream("webhook returned 500".to_owned()).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::BadGateway { .. }));
        assert_eq!(interface.code(), "upstream_failure");
    }

    #[test]
    fn rate_limit_carries_retry_hint() {
        let interface = ApplicationError::RateLimited {
            bucket: "otp_request".to_owned(),
            retry_after_secs: 42,
        }
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::TooManyRequests { retry_after_secs: 42, .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("billing.api_key is not set".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database is locked".to_owned()).into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }
}
