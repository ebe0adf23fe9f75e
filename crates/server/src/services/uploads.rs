use std::sync::Arc;

use chrono::Utc;
use intake_core::storage::StorageError;
use intake_core::{ApplicationError, DomainError, PresignedUpload, UploadRequest, UploadSigner};
use intake_db::repositories::ConversationRepository;
use tracing::info;

use super::persistence;

/// Presigned direct-to-bucket uploads. The signer is built once at startup;
/// a storage section that cannot produce one turns every call into a
/// configuration error.
pub struct UploadService {
    signer: Result<UploadSigner, StorageError>,
    conversations: Arc<dyn ConversationRepository>,
}

impl UploadService {
    pub fn new(
        signer: Result<UploadSigner, StorageError>,
        conversations: Arc<dyn ConversationRepository>,
    ) -> Self {
        Self { signer, conversations }
    }

    pub async fn presign(
        &self,
        request: UploadRequest,
        conversation_id: Option<&str>,
    ) -> Result<PresignedUpload, ApplicationError> {
        let signer = self.signer.as_ref().map_err(|error| storage_error(error.clone()))?;

        if request.file_name.trim().is_empty() {
            return Err(DomainError::invalid("file_name", "must not be empty").into());
        }
        if let Some(id) = conversation_id {
            if self.conversations.find_by_id(id).await.map_err(persistence)?.is_none() {
                return Err(ApplicationError::not_found("conversation", id));
            }
        }

        let upload = signer.presign_put(&request, Utc::now()).map_err(storage_error)?;
        info!(
            event_name = "upload.presigned",
            key = %upload.key,
            conversation_id = conversation_id.unwrap_or(""),
            content_type = %request.content_type,
            "upload url issued"
        );
        Ok(upload)
    }
}

fn storage_error(error: StorageError) -> ApplicationError {
    match error {
        StorageError::ContentTypeNotAllowed(_) => {
            DomainError::invalid("content_type", error.to_string()).into()
        }
        StorageError::TooLarge { .. } => DomainError::invalid("content_length", error.to_string()).into(),
        StorageError::NotConfigured(_) | StorageError::InvalidEndpoint(_) | StorageError::Signing => {
            ApplicationError::Configuration(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use intake_core::config::{AppConfig, StorageConfig};
    use intake_core::storage::StorageError;
    use intake_core::{ApplicationError, DomainError, UploadRequest, UploadSigner};
    use secrecy::SecretString;

    use super::UploadService;
    use crate::services::fixtures::TestHarness;

    fn storage() -> StorageConfig {
        StorageConfig {
            bucket: Some("intake-uploads".to_string()),
            endpoint: Some("https://storage.example.test".to_string()),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some(SecretString::from("secret".to_string())),
            max_upload_bytes: 1_024,
            ..AppConfig::default().storage
        }
    }

    fn pdf(size: u64) -> UploadRequest {
        UploadRequest {
            file_name: "Scope v2.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content_length: Some(size),
        }
    }

    #[tokio::test]
    async fn issues_a_signed_put_for_allowed_files() {
        let harness = TestHarness::new().await;
        let service =
            UploadService::new(UploadSigner::from_config(&storage()), harness.conversations.clone());

        let upload = service.presign(pdf(512), None).await.expect("presign");

        assert_eq!(upload.method, "PUT");
        assert!(upload.key.starts_with("uploads/"));
        assert!(upload.upload_url.contains("X-Amz-Signature="));
        assert_eq!(upload.headers.get("content-length").map(String::as_str), Some("512"));
    }

    #[tokio::test]
    async fn rejects_oversized_and_disallowed_uploads() {
        let harness = TestHarness::new().await;
        let service =
            UploadService::new(UploadSigner::from_config(&storage()), harness.conversations.clone());

        let too_large = service.presign(pdf(4_096), None).await.expect_err("too large");
        assert!(matches!(too_large, ApplicationError::Domain(DomainError::InvalidFieldValue { .. })));

        let executable = UploadRequest { content_type: "application/x-msdownload".to_string(), ..pdf(10) };
        let disallowed = service.presign(executable, None).await.expect_err("type");
        assert!(matches!(disallowed, ApplicationError::Domain(DomainError::InvalidFieldValue { .. })));

        let unknown = service.presign(pdf(10), Some("missing")).await.expect_err("conversation");
        assert!(matches!(unknown, ApplicationError::NotFound { entity: "conversation", .. }));
    }

    #[tokio::test]
    async fn missing_storage_settings_are_a_configuration_error() {
        let harness = TestHarness::new().await;
        let service = UploadService::new(
            Err(StorageError::NotConfigured("storage.bucket")),
            harness.conversations.clone(),
        );

        let error = service.presign(pdf(10), None).await.expect_err("unconfigured");
        assert!(matches!(error, ApplicationError::Configuration(_)));
    }
}
