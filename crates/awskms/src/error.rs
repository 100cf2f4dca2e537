//! Error types for master key operations.

use std::fmt;

use thiserror::Error;

/// Boxed cause carried by remote-call variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The remote KMS operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
        })
    }
}

/// Broad classification of a [`KmsError`].
///
/// Callers that implement their own retry policy branch on this:
/// - [`ErrorKind::ConfigResolution`], [`ErrorKind::Decode`],
///   [`ErrorKind::IntegrityMismatch`] and [`ErrorKind::InvalidInput`] will fail
///   the same way again.
/// - [`ErrorKind::RemoteCall`] and [`ErrorKind::DeadlineExceeded`] may succeed
///   on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigResolution,
    RemoteCall,
    Decode,
    IntegrityMismatch,
    DeadlineExceeded,
    InvalidInput,
}

/// Errors produced by the master key and its collaborators.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The key identifier is not a KMS key or alias ARN.
    #[error("no valid ARN found in '{0}'")]
    InvalidArn(String),

    /// Credential discovery or role assumption setup failed before any KMS call.
    #[error("failed to resolve AWS credentials: {0}")]
    Credentials(String),

    /// The endpoint resolver could not produce a URL.
    #[error("failed to resolve endpoint for {service} in {region}: {reason}")]
    Endpoint {
        service: String,
        region: String,
        reason: String,
    },

    /// The KMS service returned a failure.
    #[error("failed to {op} data key with AWS KMS key '{arn}'")]
    Remote {
        op: Operation,
        arn: String,
        #[source]
        source: BoxError,
    },

    /// KMS could not create a new key.
    #[error("failed to create AWS KMS key in region '{region}'")]
    CreateKey {
        region: String,
        #[source]
        source: BoxError,
    },

    /// The stored encrypted key is not valid base64.
    #[error("error base64-decoding encrypted data key: {0}")]
    Decode(#[from] base64::DecodeError),

    /// KMS rejected the ciphertext, typically because the encryption context
    /// differs from the one used at encryption time.
    #[error("AWS KMS key '{arn}' rejected the ciphertext or encryption context")]
    IntegrityMismatch {
        arn: String,
        #[source]
        source: BoxError,
    },

    /// The caller's deadline, or the SDK operation timeout, expired.
    #[error("deadline exceeded while calling AWS KMS key '{arn}'")]
    DeadlineExceeded { arn: String },

    /// The YAML credentials document could not be parsed.
    #[error("failed to parse AWS KMS credentials document: {0}")]
    CredentialsDocument(#[from] serde_yaml::Error),

    /// A serialized key map is missing fields or has the wrong shape.
    #[error("invalid KMS key metadata: {0}")]
    InvalidMetadata(String),
}

impl KmsError {
    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KmsError::InvalidArn(_) | KmsError::Credentials(_) | KmsError::Endpoint { .. } => {
                ErrorKind::ConfigResolution
            }
            KmsError::Remote { .. } | KmsError::CreateKey { .. } => ErrorKind::RemoteCall,
            KmsError::Decode(_) => ErrorKind::Decode,
            KmsError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            KmsError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            KmsError::CredentialsDocument(_) | KmsError::InvalidMetadata(_) => {
                ErrorKind::InvalidInput
            }
        }
    }
}
