//! Configuration loading and validation for `kms-keytool`.
//!
//! All values are read from `KEYTOOL_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Prefix of every environment variable read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "KEYTOOL";

/// Validated keytool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Comma-separated KMS key ARNs, each optionally suffixed with
    /// `+arn:aws:iam::...:role/...`. Required for `encrypt`.
    #[serde(default)]
    pub arn: String,

    /// IAM role to assume for keys that carry no role of their own.
    #[serde(default)]
    pub role: String,

    /// Encryption context in `k1:v1,k2:v2` form.
    #[serde(default)]
    pub context: String,

    /// Shared-config profile for credential discovery.
    #[serde(default)]
    pub aws_profile: String,

    /// Override for the KMS endpoint, e.g. a local emulator.
    #[serde(default)]
    pub endpoint_url: String,

    /// YAML file with `aws_access_key_id` / `aws_secret_access_key` /
    /// `aws_session_token`. When set, credential discovery is skipped.
    #[serde(default)]
    pub credentials_file: String,

    /// Region used by `create-key`.
    #[serde(default = "default_region")]
    pub region: String,

    /// Deadline for each KMS operation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_region() -> String {
    "us-east-1".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build keytool configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise keytool configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("KEYTOOL_TIMEOUT_SECS must be > 0");
        }
        if self.region.trim().is_empty() {
            anyhow::bail!("KEYTOOL_REGION must not be empty");
        }
        self.encryption_context()?;
        Ok(())
    }

    /// The parsed `context` value; empty when unset.
    pub fn encryption_context(&self) -> Result<HashMap<String, String>> {
        if self.context.is_empty() {
            return Ok(HashMap::new());
        }
        awskms::parse_kms_context(&self.context).with_context(|| {
            format!("KEYTOOL_CONTEXT {:?} is not of the form k1:v1,k2:v2", self.context)
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
