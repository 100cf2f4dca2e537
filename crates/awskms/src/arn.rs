//! KMS key ARN parsing.
//!
//! Accepted shape: `arn:<partition>:kms:<region>:<account>:(key|alias)/<id>`,
//! where `<partition>` starts with `aws` (`aws`, `aws-cn`, `aws-us-gov`, ...)
//! and `<account>` is all digits.

use crate::error::KmsError;

/// Separator between a KMS ARN and an IAM role ARN in the combined form
/// `arn:aws:kms:...+arn:aws:iam::...:role/...`.
const ROLE_SEPARATOR: &str = "+arn:aws:iam::";

/// A parsed KMS key or alias ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsArn<'a> {
    pub partition: &'a str,
    pub region: &'a str,
    pub account: &'a str,
    /// `key/<id>` or `alias/<name>`.
    pub resource: &'a str,
}

impl<'a> KmsArn<'a> {
    /// Parse `arn`.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::InvalidArn`] if any segment is missing or malformed.
    pub fn parse(arn: &'a str) -> Result<Self, KmsError> {
        let invalid = || KmsError::InvalidArn(arn.to_owned());

        let mut parts = arn.splitn(6, ':');
        let (Some("arn"), Some(partition), Some("kms"), Some(region), Some(account), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        if !partition.starts_with("aws") || region.is_empty() {
            return Err(invalid());
        }
        if account.is_empty() || !account.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let id = resource
            .strip_prefix("key/")
            .or_else(|| resource.strip_prefix("alias/"))
            .ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            partition,
            region,
            account,
            resource,
        })
    }
}

/// Extract the region embedded in a KMS ARN.
pub fn region_from_arn(arn: &str) -> Result<&str, KmsError> {
    KmsArn::parse(arn).map(|a| a.region)
}

/// Split a combined `<kms-arn>+<role-arn>` string into its parts.
///
/// Whitespace is removed first. Without a role suffix the role is empty.
pub fn split_role(arn: &str) -> (String, String) {
    let arn: String = arn.chars().filter(|c| *c != ' ').collect();
    match arn.find(ROLE_SEPARATOR) {
        Some(idx) if idx > 0 => (arn[..idx].to_owned(), arn[idx + 1..].to_owned()),
        _ => (arn, String::new()),
    }
}
