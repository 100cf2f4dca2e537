//! Map form of a master key, as stored in secrets documents.
//!
//! ```text
//! arn:        <kms key arn>
//! role:       <iam role arn>          (omitted when empty)
//! created_at: <RFC 3339, seconds, Z>
//! enc:        <base64 ciphertext>
//! context:    { <k>: <v>, ... }        (omitted when empty)
//! ```

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::KmsError;
use crate::master_key::{zero_time, MasterKey};

pub const ARN_KEY: &str = "arn";
pub const ROLE_KEY: &str = "role";
pub const CREATED_AT_KEY: &str = "created_at";
pub const ENC_KEY: &str = "enc";
pub const CONTEXT_KEY: &str = "context";
/// Accepted by [`MasterKey::from_map`]; never written by [`MasterKey::to_map`].
pub const AWS_PROFILE_KEY: &str = "aws_profile";

impl MasterKey {
    /// Serialize the key's metadata.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(ARN_KEY.into(), Value::String(self.arn.clone()));
        if !self.role.is_empty() {
            out.insert(ROLE_KEY.into(), Value::String(self.role.clone()));
        }
        out.insert(
            CREATED_AT_KEY.into(),
            Value::String(format_created_at(&self.creation_date)),
        );
        out.insert(ENC_KEY.into(), Value::String(self.encrypted_key.clone()));
        if !self.encryption_context.is_empty() {
            let context = self
                .encryption_context
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            out.insert(CONTEXT_KEY.into(), Value::Object(context));
        }
        out
    }

    /// Rebuild a key from [`MasterKey::to_map`] output.
    ///
    /// A missing `created_at` yields the zero time. Credentials and endpoint
    /// are not part of the map; they default to discovery and the public
    /// endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::InvalidMetadata`] if `arn` is missing, any field has
    /// the wrong type, `created_at` is not RFC 3339, or `context` is not a
    /// string map.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, KmsError> {
        let arn = string_field(map, ARN_KEY)?
            .filter(|a| !a.is_empty())
            .ok_or_else(|| KmsError::InvalidMetadata(format!("missing '{ARN_KEY}'")))?;

        let creation_date = match string_field(map, CREATED_AT_KEY)? {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map_err(|e| {
                    KmsError::InvalidMetadata(format!("invalid '{CREATED_AT_KEY}' {s:?}: {e}"))
                })?
                .with_timezone(&Utc),
            None => zero_time(),
        };

        let encryption_context = match map.get(CONTEXT_KEY) {
            None | Some(Value::Null) => HashMap::new(),
            Some(Value::Object(obj)) if obj.is_empty() => HashMap::new(),
            Some(value) => parse_kms_context_value(value).ok_or_else(|| {
                KmsError::InvalidMetadata(format!("invalid '{CONTEXT_KEY}': {value}"))
            })?,
        };

        Ok(MasterKey {
            arn: arn.to_owned(),
            role: string_field(map, ROLE_KEY)?.unwrap_or_default().to_owned(),
            encryption_context,
            encrypted_key: string_field(map, ENC_KEY)?.unwrap_or_default().to_owned(),
            creation_date,
            aws_profile: string_field(map, AWS_PROFILE_KEY)?
                .unwrap_or_default()
                .to_owned(),
            ..MasterKey::default()
        })
    }
}

fn format_created_at(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn string_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, KmsError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(KmsError::InvalidMetadata(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}

/// Parse `"k1:v1,k2:v2"` into an encryption context.
///
/// Returns `None` for an empty string or if any entry does not contain exactly
/// one `:`.
pub fn parse_kms_context(s: &str) -> Option<HashMap<String, String>> {
    if s.is_empty() {
        return None;
    }
    s.split(',')
        .map(|pair| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => Some((k.to_owned(), v.to_owned())),
                _ => None,
            }
        })
        .collect()
}

/// Parse an encryption context given either in string form (see
/// [`parse_kms_context`]) or as an object whose values are all strings.
pub fn parse_kms_context_value(value: &Value) -> Option<HashMap<String, String>> {
    match value {
        Value::String(s) => parse_kms_context(s),
        Value::Object(obj) if !obj.is_empty() => obj
            .iter()
            .map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
            .collect(),
        _ => None,
    }
}
