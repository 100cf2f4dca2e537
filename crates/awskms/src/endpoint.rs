//! Endpoint overrides for KMS calls.

use std::fmt;

use crate::error::KmsError;

/// Service name passed to [`EndpointResolver::resolve_endpoint`] for KMS.
pub const KMS_SERVICE: &str = "kms";

/// Service name passed to [`EndpointResolver::resolve_endpoint`] for the STS
/// `AssumeRole` call.
pub const STS_SERVICE: &str = "sts";

/// Maps `(service, region)` to the URL calls should be sent to instead of the
/// default public endpoint.
pub trait EndpointResolver: Send + Sync + fmt::Debug {
    fn resolve_endpoint(&self, service: &str, region: &str) -> Result<String, KmsError>;
}

/// Sends every service in every region to one URL, e.g. a local KMS emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    url: String,
}

impl StaticEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl EndpointResolver for StaticEndpoint {
    fn resolve_endpoint(&self, service: &str, region: &str) -> Result<String, KmsError> {
        if self.url.trim().is_empty() {
            return Err(KmsError::Endpoint {
                service: service.to_owned(),
                region: region.to_owned(),
                reason: "empty endpoint URL".into(),
            });
        }
        Ok(self.url.clone())
    }
}
