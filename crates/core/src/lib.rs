pub mod audit;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod normalizer;
pub mod pipeline;
pub mod rate_limit;
pub mod storage;

pub use audit::AuditEntry;
pub use crypto::{CryptoError, FieldCipher, OtpHasher};
pub use domain::account::{Account, Contact, OtpChallenge, Project, Session};
pub use domain::brief::IntakeBrief;
pub use domain::conversation::{Attachment, AttachmentInput, AttachmentOwner, Conversation, Message};
pub use domain::fields::{FieldMap, FieldValue};
pub use domain::request::{
    ClientRequest, Estimate, EstimateStatus, Impact, Invoice, InvoiceStatus, RequestType,
    RequestUpdate,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{ConversationMode, FlowEngine, IntakeState, SenderRole};
pub use normalizer::FieldNormalizer;
pub use pipeline::{AddonAssessment, AddonClassifier, EstimateTemplate};
pub use rate_limit::{RateDecision, RateLimiter, SlidingWindowRateLimiter};
pub use storage::{PresignedUpload, UploadRequest, UploadSigner};
