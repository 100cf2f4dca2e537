//! AWS KMS master key for SOPS-style secrets documents.
//!
//! A [`MasterKey`] wraps a document's data key with a KMS key, stores the
//! base64 ciphertext, and recovers the data key later. Credentials come from an
//! explicit [`CredsProvider`], or from [`DiscoverCredentials`] at call time,
//! optionally exchanged for assumed-role credentials.
//!
//! The library emits `tracing` spans and debug events but installs no
//! subscriber and never logs key material.

pub mod arn;
pub mod client;
pub mod config;
pub mod context;
pub mod credentials;
pub mod data_key;
pub mod endpoint;
pub mod error;
pub mod master_key;
pub mod serialize;

#[cfg(test)]
mod testing;

pub use client::{KmsOracle, RemoteError, SdkKmsOracle};
pub use config::KmsConfigBuilder;
pub use context::CallContext;
pub use credentials::{
    load_creds_provider_from_yaml, CredsProvider, DefaultChain, DiscoverCredentials,
    EnvironmentCredentials,
};
pub use data_key::DataKey;
pub use endpoint::{EndpointResolver, StaticEndpoint};
pub use error::{ErrorKind, KmsError};
pub use master_key::{master_keys_from_arn_string, MasterKey, KMS_TTL};
pub use serialize::{parse_kms_context, parse_kms_context_value};
