//! Credential sources for KMS calls.
//!
//! Two seams:
//! - [`CredsProvider`] carries an explicit, pre-resolved provider and binds it
//!   onto a [`MasterKey`], bypassing discovery.
//! - [`DiscoverCredentials`] is consulted at call time when a key has no
//!   explicit provider. [`DefaultChain`] is the production implementation.

use std::fmt;

use async_trait::async_trait;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::Region;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use serde::Deserialize;

use crate::error::KmsError;
use crate::master_key::MasterKey;

const STATIC_PROVIDER_NAME: &str = "sops-kms-static";

/// Wrapper around an explicit credentials provider.
#[derive(Debug, Clone)]
pub struct CredsProvider {
    pub(crate) provider: SharedCredentialsProvider,
}

impl CredsProvider {
    /// Wrap any credentials provider.
    pub fn new(provider: impl ProvideCredentials + 'static) -> Self {
        Self {
            provider: SharedCredentialsProvider::new(provider),
        }
    }

    /// Build a provider that always returns the given keys. An empty session
    /// token means none.
    pub fn from_static(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        let token = session_token.into();
        Self::new(Credentials::new(
            access_key_id,
            secret_access_key,
            (!token.is_empty()).then_some(token),
            None,
            STATIC_PROVIDER_NAME,
        ))
    }

    /// Overwrite the key's credentials provider with this one.
    pub fn apply_to_master_key(&self, key: &mut MasterKey) {
        key.credentials_provider = Some(self.provider.clone());
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &SharedCredentialsProvider {
        &self.provider
    }
}

#[derive(Deserialize)]
struct CredentialsDocument {
    #[serde(default)]
    aws_access_key_id: String,
    #[serde(default)]
    aws_secret_access_key: String,
    #[serde(default)]
    aws_session_token: String,
}

/// Parse a YAML document of the form
///
/// ```yaml
/// aws_access_key_id: AKIA...
/// aws_secret_access_key: ...
/// aws_session_token: ...
/// ```
///
/// into a static [`CredsProvider`].
///
/// # Errors
///
/// Returns [`KmsError::CredentialsDocument`] if the bytes are not a YAML
/// mapping with string values for those keys.
pub fn load_creds_provider_from_yaml(bytes: &[u8]) -> Result<CredsProvider, KmsError> {
    let doc: CredentialsDocument = serde_yaml::from_slice(bytes)?;
    Ok(CredsProvider::from_static(
        doc.aws_access_key_id,
        doc.aws_secret_access_key,
        doc.aws_session_token,
    ))
}

/// Resolves credentials for a key that carries no explicit provider.
#[async_trait]
pub trait DiscoverCredentials: Send + Sync + fmt::Debug {
    /// Produce a provider for `region`, optionally pinned to a named
    /// shared-config profile. Resolution of the actual keys may be deferred to
    /// the provider's first use.
    async fn discover(
        &self,
        region: &Region,
        profile: Option<&str>,
    ) -> Result<SharedCredentialsProvider, KmsError>;
}

/// The AWS default credential chain: environment, shared config and
/// credentials files, web identity, ECS and EC2 instance metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultChain;

#[async_trait]
impl DiscoverCredentials for DefaultChain {
    async fn discover(
        &self,
        region: &Region,
        profile: Option<&str>,
    ) -> Result<SharedCredentialsProvider, KmsError> {
        let mut builder = DefaultCredentialsChain::builder().region(region.clone());
        if let Some(profile) = profile {
            builder = builder.profile_name(profile);
        }
        Ok(SharedCredentialsProvider::new(builder.build().await))
    }
}

/// Only `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`,
/// read from the process environment when credentials are first requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentCredentials;

#[async_trait]
impl DiscoverCredentials for EnvironmentCredentials {
    async fn discover(
        &self,
        _region: &Region,
        _profile: Option<&str>,
    ) -> Result<SharedCredentialsProvider, KmsError> {
        Ok(SharedCredentialsProvider::new(
            EnvironmentVariableCredentialsProvider::new(),
        ))
    }
}
