//! [`MasterKey`]: a data key wrapped by one AWS KMS key.
//!
//! # Lifecycle
//!
//! 1. Construct from an ARN (optionally `<kms-arn>+<role-arn>`) and an
//!    encryption context.
//! 2. [`MasterKey::encrypt_if_needed`] wraps the document's data key once and
//!    stores the base64 ciphertext.
//! 3. [`MasterKey::to_map`] persists the metadata; a later process rebuilds the
//!    key with [`MasterKey::from_map`] and calls [`MasterKey::decrypt`].
//!
//! A `MasterKey` is not meant to be mutated from several tasks at once; the
//! at-most-one-remote-call guarantee of `encrypt_if_needed` assumes exclusive
//! access, which `&mut self` enforces.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use aws_credential_types::provider::SharedCredentialsProvider;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::arn::{region_from_arn, split_role};
use crate::client::{KmsOracle, RemoteError, SdkKmsOracle};
use crate::config::KmsConfigBuilder;
use crate::context::CallContext;
use crate::credentials::{CredsProvider, DefaultChain, DiscoverCredentials};
use crate::data_key::DataKey;
use crate::endpoint::EndpointResolver;
use crate::error::{KmsError, Operation};

/// Age after which a master key should be re-wrapped (6 × 30 days).
pub const KMS_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30 * 6);

/// Identifier of this master key type in secrets documents.
pub const KEY_TYPE_IDENTIFIER: &str = "kms";

/// Unix timestamp of `0001-01-01T00:00:00Z`.
const ZERO_TIME_UNIX_SECS: i64 = -62_135_596_800;

/// The zero creation date: `0001-01-01T00:00:00Z`.
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_UNIX_SECS, 0).unwrap_or_default()
}

/// A data key wrapped (or to be wrapped) by an AWS KMS key.
#[derive(Clone)]
pub struct MasterKey {
    /// ARN of the KMS key or alias.
    pub arn: String,
    /// IAM role to assume before calling KMS; empty for none.
    pub role: String,
    /// Additional authenticated data bound to the ciphertext.
    pub encryption_context: HashMap<String, String>,
    /// Standard base64 of the KMS ciphertext blob; empty until encrypted.
    pub encrypted_key: String,
    pub creation_date: DateTime<Utc>,
    /// Shared-config profile for credential discovery; empty for the default.
    pub aws_profile: String,

    pub(crate) credentials_provider: Option<SharedCredentialsProvider>,
    pub(crate) endpoint_resolver: Option<Arc<dyn EndpointResolver>>,
    pub(crate) discovery: Arc<dyn DiscoverCredentials>,
}

impl Default for MasterKey {
    fn default() -> Self {
        Self {
            arn: String::new(),
            role: String::new(),
            encryption_context: HashMap::new(),
            encrypted_key: String::new(),
            creation_date: zero_time(),
            aws_profile: String::new(),
            credentials_provider: None,
            endpoint_resolver: None,
            discovery: Arc::new(DefaultChain),
        }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("arn", &self.arn)
            .field("role", &self.role)
            .field("encryption_context", &self.encryption_context)
            .field("encrypted_key", &self.encrypted_key)
            .field("creation_date", &self.creation_date)
            .field("aws_profile", &self.aws_profile)
            .field("explicit_credentials", &self.credentials_provider.is_some())
            .field("endpoint_resolver", &self.endpoint_resolver)
            .field("discovery", &self.discovery)
            .finish()
    }
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arn)
    }
}

impl MasterKey {
    /// A key for `arn`, assuming `role` (empty for none), created now.
    pub fn new(
        arn: impl Into<String>,
        role: impl Into<String>,
        encryption_context: HashMap<String, String>,
    ) -> Self {
        Self {
            arn: arn.into(),
            role: role.into(),
            encryption_context,
            creation_date: Utc::now(),
            ..Self::default()
        }
    }

    /// A key from an ARN that may carry a `+arn:aws:iam::...` role suffix.
    /// Spaces are ignored.
    pub fn from_arn(
        arn: &str,
        encryption_context: HashMap<String, String>,
        aws_profile: impl Into<String>,
    ) -> Self {
        let (arn, role) = split_role(arn);
        Self {
            aws_profile: aws_profile.into(),
            ..Self::new(arn, role, encryption_context)
        }
    }

    /// Use `provider` instead of credential discovery.
    pub fn with_credentials(mut self, provider: &CredsProvider) -> Self {
        provider.apply_to_master_key(&mut self);
        self
    }

    /// Send KMS calls to the resolver's endpoint.
    pub fn with_endpoint_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.endpoint_resolver = Some(resolver);
        self
    }

    /// Replace the credential discovery used when no explicit provider is set.
    pub fn with_credential_discovery(mut self, discovery: Arc<dyn DiscoverCredentials>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Drop the explicit provider so discovery is used again.
    pub fn clear_credentials(&mut self) {
        self.credentials_provider = None;
    }

    pub fn encrypted_data_key(&self) -> &str {
        &self.encrypted_key
    }

    pub fn set_encrypted_data_key(&mut self, encrypted_key: impl Into<String>) {
        self.encrypted_key = encrypted_key.into();
    }

    pub fn type_identifier(&self) -> &'static str {
        KEY_TYPE_IDENTIFIER
    }

    /// Whether the key is older than [`KMS_TTL`]. Advisory only.
    pub fn needs_rotation(&self) -> bool {
        (Utc::now() - self.creation_date)
            .to_std()
            .is_ok_and(|age| age > KMS_TTL)
    }

    /// Resolve region, credentials and endpoint for this key.
    ///
    /// # Errors
    ///
    /// [`KmsError::InvalidArn`] if the ARN carries no region, or any
    /// credential/endpoint resolution failure.
    pub async fn create_kms_config(&self) -> Result<SdkConfig, KmsError> {
        let region = region_from_arn(&self.arn)?;
        KmsConfigBuilder::new(region)
            .credentials_provider(self.credentials_provider.clone())
            .role(self.role.as_str())
            .profile(self.aws_profile.as_str())
            .endpoint_resolver(self.endpoint_resolver.clone())
            .discovery(Arc::clone(&self.discovery))
            .build()
            .await
    }

    /// Wrap `data_key` with KMS and store the result, replacing any previous
    /// ciphertext.
    #[instrument(skip_all, fields(arn = %self.arn))]
    pub async fn encrypt(&mut self, ctx: &CallContext, data_key: &[u8]) -> Result<(), KmsError> {
        self.encrypted_key = self.wrap(ctx, None, data_key).await?;
        debug!("data key encrypted");
        Ok(())
    }

    /// [`MasterKey::encrypt`] against a caller-supplied KMS.
    #[instrument(skip_all, fields(arn = %self.arn))]
    pub async fn encrypt_with(
        &mut self,
        ctx: &CallContext,
        kms: &dyn KmsOracle,
        data_key: &[u8],
    ) -> Result<(), KmsError> {
        self.encrypted_key = self.wrap(ctx, Some(kms), data_key).await?;
        debug!("data key encrypted");
        Ok(())
    }

    /// Encrypt only if no ciphertext is stored yet.
    pub async fn encrypt_if_needed(
        &mut self,
        ctx: &CallContext,
        data_key: &[u8],
    ) -> Result<(), KmsError> {
        if !self.encrypted_key.is_empty() {
            return Ok(());
        }
        self.encrypt(ctx, data_key).await
    }

    pub async fn encrypt_if_needed_with(
        &mut self,
        ctx: &CallContext,
        kms: &dyn KmsOracle,
        data_key: &[u8],
    ) -> Result<(), KmsError> {
        if !self.encrypted_key.is_empty() {
            return Ok(());
        }
        self.encrypt_with(ctx, kms, data_key).await
    }

    /// Recover the plaintext data key.
    #[instrument(skip_all, fields(arn = %self.arn))]
    pub async fn decrypt(&self, ctx: &CallContext) -> Result<DataKey, KmsError> {
        self.unwrap_key(ctx, None).await
    }

    /// [`MasterKey::decrypt`] against a caller-supplied KMS.
    #[instrument(skip_all, fields(arn = %self.arn))]
    pub async fn decrypt_with(
        &self,
        ctx: &CallContext,
        kms: &dyn KmsOracle,
    ) -> Result<DataKey, KmsError> {
        self.unwrap_key(ctx, Some(kms)).await
    }

    async fn wrap(
        &self,
        ctx: &CallContext,
        kms: Option<&dyn KmsOracle>,
        data_key: &[u8],
    ) -> Result<String, KmsError> {
        let ciphertext = ctx
            .run(&self.arn, async {
                match kms {
                    Some(kms) => self.remote_encrypt(kms, data_key).await,
                    None => {
                        let sdk = SdkKmsOracle::new(&self.create_kms_config().await?);
                        self.remote_encrypt(&sdk, data_key).await
                    }
                }
            })
            .await?;
        Ok(STANDARD.encode(ciphertext))
    }

    async fn unwrap_key(
        &self,
        ctx: &CallContext,
        kms: Option<&dyn KmsOracle>,
    ) -> Result<DataKey, KmsError> {
        let ciphertext = STANDARD.decode(&self.encrypted_key)?;
        let plaintext = ctx
            .run(&self.arn, async {
                match kms {
                    Some(kms) => self.remote_decrypt(kms, &ciphertext).await,
                    None => {
                        let sdk = SdkKmsOracle::new(&self.create_kms_config().await?);
                        self.remote_decrypt(&sdk, &ciphertext).await
                    }
                }
            })
            .await?;
        debug!("data key decrypted");
        Ok(DataKey::new(plaintext))
    }

    async fn remote_encrypt(
        &self,
        kms: &dyn KmsOracle,
        data_key: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        kms.encrypt(&self.arn, data_key, &self.encryption_context)
            .await
            .map_err(|e| self.remote_error(Operation::Encrypt, e))
    }

    async fn remote_decrypt(
        &self,
        kms: &dyn KmsOracle,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        kms.decrypt(ciphertext, &self.encryption_context)
            .await
            .map_err(|e| self.remote_error(Operation::Decrypt, e))
    }

    fn remote_error(&self, op: Operation, err: RemoteError) -> KmsError {
        let arn = self.arn.clone();
        match err {
            RemoteError::Timeout(_) => KmsError::DeadlineExceeded { arn },
            RemoteError::InvalidCiphertext(source) => KmsError::IntegrityMismatch { arn, source },
            RemoteError::Service(source) => KmsError::Remote { op, arn, source },
        }
    }
}

/// Build one master key per entry of a comma-separated ARN list.
pub fn master_keys_from_arn_string(
    arns: &str,
    encryption_context: &HashMap<String, String>,
    aws_profile: &str,
) -> Vec<MasterKey> {
    if arns.is_empty() {
        return Vec::new();
    }
    arns.split(',')
        .map(|arn| MasterKey::from_arn(arn, encryption_context.clone(), aws_profile))
        .collect()
}
