//! KMS client adapter.
//!
//! [`KmsOracle`] is the seam between [`MasterKey`](crate::MasterKey) and the
//! remote service; [`SdkKmsOracle`] implements it with `aws-sdk-kms`.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_kms::error::SdkError;
use aws_sdk_kms::primitives::Blob;
use thiserror::Error;

use crate::error::{BoxError, KmsError};

/// Failure reported by a [`KmsOracle`], before the master key attaches its
/// ARN.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request did not complete within the SDK's operation timeout.
    #[error("KMS request timed out")]
    Timeout(#[source] BoxError),

    /// KMS rejected the ciphertext: wrong key, tampered blob, or an encryption
    /// context that differs from the one used to encrypt.
    #[error("KMS rejected the ciphertext")]
    InvalidCiphertext(#[source] BoxError),

    /// Any other failure: auth, throttling, missing key, network.
    #[error(transparent)]
    Service(BoxError),
}

/// The remote KMS operations a master key needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KmsOracle: Send + Sync {
    /// Encrypt `plaintext` under `key_id`, binding `context` as AAD.
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &HashMap<String, String>,
    ) -> Result<Vec<u8>, RemoteError>;

    /// Decrypt a blob previously returned by [`KmsOracle::encrypt`] with the
    /// same `context`.
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &HashMap<String, String>,
    ) -> Result<Vec<u8>, RemoteError>;
}

/// [`KmsOracle`] backed by an `aws-sdk-kms` client.
#[derive(Debug, Clone)]
pub struct SdkKmsOracle {
    client: aws_sdk_kms::Client,
}

impl SdkKmsOracle {
    /// Build a client from a resolved configuration.
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_kms::Client::new(config),
        }
    }

    pub fn from_client(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }

    /// Create a new symmetric KMS key and return its ARN. Setup only.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::CreateKey`] if the call fails or the response
    /// carries no ARN.
    pub async fn create_key(&self) -> Result<String, KmsError> {
        let region = self
            .client
            .config()
            .region()
            .map(|r| r.to_string())
            .unwrap_or_default();
        let failed = |source: BoxError| KmsError::CreateKey {
            region: region.clone(),
            source,
        };

        let out = self
            .client
            .create_key()
            .send()
            .await
            .map_err(|e| failed(Box::new(e)))?;

        out.key_metadata()
            .and_then(|m| m.arn())
            .map(str::to_owned)
            .ok_or_else(|| failed("KMS create key response contained no ARN".into()))
    }
}

#[async_trait]
impl KmsOracle for SdkKmsOracle {
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &HashMap<String, String>,
    ) -> Result<Vec<u8>, RemoteError> {
        let out = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .set_encryption_context(context_param(context))
            .send()
            .await
            .map_err(|e| classify(e, |_| false))?;

        out.ciphertext_blob()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| RemoteError::Service("KMS encrypt response contained no ciphertext".into()))
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &HashMap<String, String>,
    ) -> Result<Vec<u8>, RemoteError> {
        let out = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .set_encryption_context(context_param(context))
            .send()
            .await
            .map_err(|e| {
                classify(e, |err| {
                    err.is_invalid_ciphertext_exception() || err.is_incorrect_key_exception()
                })
            })?;

        out.plaintext()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| RemoteError::Service("KMS decrypt response contained no plaintext".into()))
    }
}

fn context_param(context: &HashMap<String, String>) -> Option<HashMap<String, String>> {
    (!context.is_empty()).then(|| context.clone())
}

/// Sort an SDK failure into timeout, ciphertext rejection, or anything else.
fn classify<E, R>(err: SdkError<E, R>, rejected: impl FnOnce(&E) -> bool) -> RemoteError
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let timed_out = matches!(err, SdkError::TimeoutError(_));
    let is_rejection = err.as_service_error().is_some_and(rejected);
    let source: BoxError = Box::new(err);
    if timed_out {
        RemoteError::Timeout(source)
    } else if is_rejection {
        RemoteError::InvalidCiphertext(source)
    } else {
        RemoteError::Service(source)
    }
}
