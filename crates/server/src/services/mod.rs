pub mod auth;
pub mod intake;
pub mod notify;
pub mod requests;
pub mod uploads;

use intake_core::rate_limit::{RateDecision, RateLimiter};
use intake_core::ApplicationError;
use intake_db::RepositoryError;

pub use auth::{AuthService, LoggingOtpSender, OtpSender};
pub use intake::IntakeService;
pub use notify::{DispatchOutcome, NotificationDispatcher};
pub use requests::RequestService;
pub use uploads::UploadService;

pub(crate) fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

pub(crate) fn admit(
    limiter: &dyn RateLimiter,
    bucket: &str,
    key: &str,
) -> Result<(), ApplicationError> {
    match limiter.check(bucket, key) {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { retry_after_secs } => {
            Err(ApplicationError::RateLimited { bucket: bucket.to_owned(), retry_after_secs })
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
