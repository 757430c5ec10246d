//! Object storage client configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{BlobError, BlobResult, StreamUploadOptions};

/// Domain under which every R2 account endpoint lives.
pub const R2_DOMAIN: &str = "r2.cloudflarestorage.com";

/// Smallest part size S3-compatible stores accept for every part but the
/// last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default multipart part size.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Default number of parts uploaded concurrently.
pub const DEFAULT_MAX_CONCURRENT_PARTS: usize = 2;

/// Static credentials for a Cloudflare R2 account.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct R2Credentials {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

impl R2Credentials {
    pub fn new(account_id: &str, access_key_id: &str, secret_access_key: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        }
    }

    /// S3 endpoint of the account, `https://{account}.r2.cloudflarestorage.com`.
    pub fn endpoint(&self) -> String {
        format!("https://{}.{}", self.account_id, R2_DOMAIN)
    }
}

impl fmt::Debug for R2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("R2Credentials")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for the S3/R2 storage client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StorageConfig {
    #[serde(flatten)]
    pub credentials: R2Credentials,

    /// Overrides the endpoint derived from the account id (MinIO,
    /// localstack, other S3-compatible stores).
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Location constraint sent with bucket creation.
    #[serde(default = "default_location_hint")]
    pub location_hint: Option<String>,

    #[serde(default = "default_part_size")]
    pub part_size: usize,

    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            credentials: R2Credentials::default(),
            endpoint: None,
            region: default_region(),
            location_hint: default_location_hint(),
            part_size: default_part_size(),
            max_concurrent_parts: default_max_concurrent_parts(),
        }
    }
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_location_hint() -> Option<String> {
    Some("hint:WNAM".to_string())
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_max_concurrent_parts() -> usize {
    DEFAULT_MAX_CONCURRENT_PARTS
}

impl S3StorageConfig {
    pub fn new(credentials: R2Credentials) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }

    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => self.credentials.endpoint(),
        }
    }

    pub fn upload_options(&self) -> StreamUploadOptions {
        StreamUploadOptions {
            part_size: self.part_size,
            max_concurrent_parts: self.max_concurrent_parts,
        }
    }

    pub fn validate(&self) -> BlobResult<()> {
        if self.endpoint.is_none() && self.credentials.account_id.is_empty() {
            return Err(BlobError::InvalidConfig {
                reason: "either account_id or endpoint must be set".to_string(),
            });
        }
        if self.credentials.access_key_id.is_empty() || self.credentials.secret_access_key.is_empty()
        {
            return Err(BlobError::InvalidConfig {
                reason: "access_key_id and secret_access_key are required".to_string(),
            });
        }
        let endpoint = self.endpoint().parse::<Url>()?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(BlobError::InvalidConfig {
                reason: format!("unsupported endpoint scheme: {}", endpoint.scheme()),
            });
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(BlobError::InvalidConfig {
                reason: format!(
                    "part_size {} is below the minimum of {} bytes",
                    self.part_size, MIN_PART_SIZE
                ),
            });
        }
        if self.max_concurrent_parts == 0 {
            return Err(BlobError::InvalidConfig {
                reason: "max_concurrent_parts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3StorageConfig {
        S3StorageConfig::new(R2Credentials::new("acct123", "AKID", "SECRET"))
    }

    #[test]
    fn test_r2_endpoint_from_account() {
        assert_eq!(
            config().endpoint(),
            "https://acct123.r2.cloudflarestorage.com"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let mut config = config();
        config.endpoint = Some("http://localhost:9000/".to_string());
        assert_eq!(config.endpoint(), "http://localhost:9000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = S3StorageConfig::new(R2Credentials::new("acct123", "", ""));
        assert!(matches!(
            config.validate(),
            Err(BlobError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_small_parts() {
        let mut config = config();
        config.part_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let printed = format!("{:?}", config().credentials);
        assert!(printed.contains("acct123"));
        assert!(!printed.contains("SECRET"));
    }
}
