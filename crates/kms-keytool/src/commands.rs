//! `encrypt`, `decrypt` and `create-key` command implementations.
//!
//! Each command takes its input as a string and returns its stdout output so
//! that `main` owns all I/O.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use awskms::{
    load_creds_provider_from_yaml, master_keys_from_arn_string, CallContext, KmsConfigBuilder,
    KmsOracle, MasterKey, SdkKmsOracle, StaticEndpoint,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;

pub const USAGE: &str = "usage: kms-keytool <encrypt|decrypt|create-key>";

/// A keytool subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// stdin: base64 data key. stdout: JSON array of key maps.
    Encrypt,
    /// stdin: JSON key map or array of key maps. stdout: base64 data key.
    Decrypt,
    /// stdout: ARN of a newly created KMS key.
    CreateKey,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "encrypt" => Ok(Command::Encrypt),
            "decrypt" => Ok(Command::Decrypt),
            "create-key" => Ok(Command::CreateKey),
            other => anyhow::bail!("unknown command {other:?}; {USAGE}"),
        }
    }
}

/// Apply credentials file, endpoint and role overrides from `cfg` to `key`.
fn prepare(cfg: &Config, mut key: MasterKey) -> Result<MasterKey> {
    if !cfg.credentials_file.is_empty() {
        let bytes = std::fs::read(&cfg.credentials_file).with_context(|| {
            format!("failed to read credentials file {}", cfg.credentials_file)
        })?;
        load_creds_provider_from_yaml(&bytes)?.apply_to_master_key(&mut key);
    }
    if !cfg.endpoint_url.is_empty() {
        key = key.with_endpoint_resolver(Arc::new(StaticEndpoint::new(cfg.endpoint_url.clone())));
    }
    if key.role.is_empty() {
        key.role = cfg.role.clone();
    }
    if key.aws_profile.is_empty() {
        key.aws_profile = cfg.aws_profile.clone();
    }
    Ok(key)
}

fn master_keys(cfg: &Config) -> Result<Vec<MasterKey>> {
    if cfg.arn.trim().is_empty() {
        anyhow::bail!("KEYTOOL_ARN is required for encrypt");
    }
    let context = cfg.encryption_context()?;
    master_keys_from_arn_string(&cfg.arn, &context, &cfg.aws_profile)
        .into_iter()
        .map(|key| prepare(cfg, key))
        .collect()
}

fn parse_key_maps(cfg: &Config, input: &str) -> Result<Vec<MasterKey>> {
    let value: Value = serde_json::from_str(input).context("stdin is not valid JSON")?;
    let maps = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => anyhow::bail!("expected a key map or an array of key maps"),
    };
    maps.iter()
        .map(|v| {
            let map = v.as_object().context("key entry is not a JSON object")?;
            prepare(cfg, MasterKey::from_map(map)?)
        })
        .collect()
}

fn decode_data_key(input: &str) -> Result<Vec<u8>> {
    let data_key = STANDARD
        .decode(input.trim())
        .context("stdin is not a base64 data key")?;
    if data_key.is_empty() {
        anyhow::bail!("data key must not be empty");
    }
    Ok(data_key)
}

fn render_keys(keys: &[MasterKey]) -> Result<String> {
    let maps: Vec<Value> = keys.iter().map(|k| Value::Object(k.to_map())).collect();
    serde_json::to_string_pretty(&maps).context("failed to serialise key maps")
}

/// Wrap the base64 data key in `input` with every configured KMS key.
pub async fn encrypt(cfg: &Config, input: &str) -> Result<String> {
    encrypt_inner(cfg, input, None).await
}

/// [`encrypt`] against a caller-supplied KMS.
pub async fn encrypt_with(cfg: &Config, input: &str, kms: &dyn KmsOracle) -> Result<String> {
    encrypt_inner(cfg, input, Some(kms)).await
}

async fn encrypt_inner(cfg: &Config, input: &str, kms: Option<&dyn KmsOracle>) -> Result<String> {
    let data_key = decode_data_key(input)?;
    let mut keys = master_keys(cfg)?;
    for key in &mut keys {
        let ctx = CallContext::with_timeout(cfg.timeout());
        let result = match kms {
            Some(kms) => key.encrypt_if_needed_with(&ctx, kms, &data_key).await,
            None => key.encrypt_if_needed(&ctx, &data_key).await,
        };
        result.with_context(|| format!("failed to encrypt with {key}"))?;
        info!(arn = %key.arn, "data key encrypted");
    }
    render_keys(&keys)
}

/// Recover the data key from the first key map in `input` that decrypts.
pub async fn decrypt(cfg: &Config, input: &str) -> Result<String> {
    decrypt_inner(cfg, input, None).await
}

/// [`decrypt`] against a caller-supplied KMS.
pub async fn decrypt_with(cfg: &Config, input: &str, kms: &dyn KmsOracle) -> Result<String> {
    decrypt_inner(cfg, input, Some(kms)).await
}

async fn decrypt_inner(cfg: &Config, input: &str, kms: Option<&dyn KmsOracle>) -> Result<String> {
    let keys = parse_key_maps(cfg, input)?;
    let mut failures = Vec::new();
    for key in &keys {
        let ctx = CallContext::with_timeout(cfg.timeout());
        let result = match kms {
            Some(kms) => key.decrypt_with(&ctx, kms).await,
            None => key.decrypt(&ctx).await,
        };
        match result {
            Ok(data_key) => {
                info!(arn = %key.arn, "data key decrypted");
                return Ok(STANDARD.encode(data_key.as_bytes()));
            }
            Err(e) => {
                warn!(arn = %key.arn, error = %e, kind = ?e.kind(), "decryption failed; trying next key");
                failures.push(format!("{key}: {e}"));
            }
        }
    }
    anyhow::bail!(
        "no key could decrypt the data key:\n  {}",
        failures.join("\n  ")
    )
}

/// Create a KMS key in the configured region.
pub async fn create_key(cfg: &Config) -> Result<String> {
    let mut builder = KmsConfigBuilder::new(cfg.region.clone())
        .role(cfg.role.as_str())
        .profile(cfg.aws_profile.as_str());
    if !cfg.credentials_file.is_empty() {
        let bytes = std::fs::read(&cfg.credentials_file).with_context(|| {
            format!("failed to read credentials file {}", cfg.credentials_file)
        })?;
        let provider = load_creds_provider_from_yaml(&bytes)?;
        builder = builder.credentials_provider(Some(provider.provider().clone()));
    }
    if !cfg.endpoint_url.is_empty() {
        builder = builder.endpoint_resolver(Some(Arc::new(StaticEndpoint::new(
            cfg.endpoint_url.clone(),
        ))));
    }
    let sdk_config = builder.build().await?;
    let arn = tokio::time::timeout(cfg.timeout(), SdkKmsOracle::new(&sdk_config).create_key())
        .await
        .context("deadline exceeded while creating KMS key")??;
    info!(arn = %arn, "KMS key created");
    Ok(arn)
}
