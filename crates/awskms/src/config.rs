//! Resolution of the SDK configuration used for KMS calls.
//!
//! Order:
//! 1. An explicit credentials provider wins.
//! 2. Otherwise the injected [`DiscoverCredentials`] is asked.
//! 3. With a role set, the result of (1)/(2) only serves as base credentials
//!    for STS `AssumeRole`; KMS sees the assumed-role credentials.
//! 4. An endpoint resolver, when present, overrides the KMS endpoint and the
//!    STS endpoint used for `AssumeRole`.

use std::sync::Arc;

use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use tracing::debug;

use crate::credentials::{DefaultChain, DiscoverCredentials};
use crate::endpoint::{EndpointResolver, KMS_SERVICE, STS_SERVICE};
use crate::error::KmsError;

/// STS limit on `RoleSessionName`.
const ROLE_SESSION_NAME_MAX_LEN: usize = 64;

/// Builds a fully resolved [`SdkConfig`] (region, credentials, endpoint) for
/// one region.
#[derive(Debug, Clone)]
pub struct KmsConfigBuilder {
    region: String,
    credentials: Option<SharedCredentialsProvider>,
    role: Option<String>,
    profile: Option<String>,
    endpoint: Option<Arc<dyn EndpointResolver>>,
    discovery: Arc<dyn DiscoverCredentials>,
}

impl KmsConfigBuilder {
    /// Start a builder for `region` using the default credential chain.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            credentials: None,
            role: None,
            profile: None,
            endpoint: None,
            discovery: Arc::new(DefaultChain),
        }
    }

    pub fn credentials_provider(mut self, provider: Option<SharedCredentialsProvider>) -> Self {
        self.credentials = provider;
        self
    }

    /// IAM role to assume before calling KMS. Empty means none.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = non_empty(role.into());
        self
    }

    /// Shared-config profile used for discovery. Empty means the default.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = non_empty(profile.into());
        self
    }

    pub fn endpoint_resolver(mut self, resolver: Option<Arc<dyn EndpointResolver>>) -> Self {
        self.endpoint = resolver;
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn DiscoverCredentials>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Resolve the configuration.
    ///
    /// # Errors
    ///
    /// Returns a config-resolution error if credential discovery or the
    /// endpoint resolver fails. No KMS call is made.
    pub async fn build(self) -> Result<SdkConfig, KmsError> {
        let region = Region::new(self.region.clone());

        let base = match self.credentials {
            Some(provider) => provider,
            None => {
                self.discovery
                    .discover(&region, self.profile.as_deref())
                    .await?
            }
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .credentials_provider(base.clone());
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        if let (Some(resolver), Some(_)) = (&self.endpoint, &self.role) {
            let url = resolver.resolve_endpoint(STS_SERVICE, &self.region)?;
            debug!(endpoint = %url, "overriding STS endpoint");
            loader = loader.endpoint_url(url);
        }
        let base_config = loader.load().await;

        let credentials = match &self.role {
            Some(role) => {
                let session_name = role_session_name(&hostname());
                debug!(role = %role, session_name = %session_name, "assuming role for KMS calls");
                let provider = AssumeRoleProvider::builder(role)
                    .session_name(session_name)
                    .region(region.clone())
                    .configure(&base_config)
                    .build()
                    .await;
                SharedCredentialsProvider::new(provider)
            }
            None => base,
        };

        let mut builder = base_config.to_builder().credentials_provider(credentials);
        if let Some(resolver) = &self.endpoint {
            let url = resolver.resolve_endpoint(KMS_SERVICE, &self.region)?;
            debug!(endpoint = %url, "overriding KMS endpoint");
            builder = builder.endpoint_url(url);
        }
        Ok(builder.build())
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_owned())
        })
        .unwrap_or_default()
}

/// `sops@<host>` with characters STS rejects removed, capped at the STS
/// length limit.
pub(crate) fn role_session_name(host: &str) -> String {
    let sanitized: String = host
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "_+=,.@-".contains(*c))
        .collect();
    let mut name = format!("sops@{sanitized}");
    name.truncate(ROLE_SESSION_NAME_MAX_LEN);
    name
}
