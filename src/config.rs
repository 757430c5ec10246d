use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use blob_store::{ObjectDestination, S3StorageConfig};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use transfer::{TransferRequest, DEFAULT_CHUNK_SIZE};

/// Prefix of the environment variables read into the config. Nested keys
/// are separated by `__`, e.g. `R2_STREAM_STORAGE__ACCESS_KEY_ID`.
pub const ENV_PREFIX: &str = "R2_STREAM_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    #[serde(default)]
    pub storage: S3StorageConfig,
    #[serde(default)]
    pub bucket: String,
    /// Object key. Defaults to the source file name.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Create the bucket before uploading when it does not exist.
    #[serde(default = "default_ensure_bucket")]
    pub ensure_bucket: bool,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub structured_logging: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_ensure_bucket() -> bool {
    true
}

impl Default for UploaderConfig {
    fn default() -> Self {
        UploaderConfig {
            storage: S3StorageConfig::default(),
            bucket: String::new(),
            key: None,
            source: None,
            chunk_size: default_chunk_size(),
            ensure_bucket: default_ensure_bucket(),
            deadline_secs: None,
            structured_logging: false,
        }
    }
}

/// Values given on the command line. They take precedence over the
/// environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source: Option<PathBuf>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub account_id: Option<String>,
    pub chunk_size: Option<usize>,
    pub skip_bucket_check: bool,
    pub deadline_secs: Option<u64>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(source) = &self.source {
            figment = figment.merge(Serialized::default("source", source));
        }
        if let Some(bucket) = &self.bucket {
            figment = figment.merge(Serialized::default("bucket", bucket));
        }
        if let Some(key) = &self.key {
            figment = figment.merge(Serialized::default("key", key));
        }
        if let Some(account_id) = &self.account_id {
            figment = figment.merge(Serialized::default("storage.account_id", account_id));
        }
        if let Some(chunk_size) = self.chunk_size {
            figment = figment.merge(Serialized::default("chunk_size", chunk_size));
        }
        if self.skip_bucket_check {
            figment = figment.merge(Serialized::default("ensure_bucket", false));
        }
        if let Some(deadline_secs) = self.deadline_secs {
            figment = figment.merge(Serialized::default("deadline_secs", deadline_secs));
        }
        figment
    }
}

impl UploaderConfig {
    /// Loads the config from an optional YAML file, the environment and
    /// the command line, in increasing order of precedence.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<UploaderConfig> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: UploaderConfig = overrides.apply(figment).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.is_none() {
            return Err(anyhow!("no source file given"));
        }
        if self.bucket.is_empty() {
            return Err(anyhow!("no destination bucket given"));
        }
        if self.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be at least 1 byte"));
        }
        if matches!(&self.key, Some(key) if key.is_empty()) {
            return Err(anyhow!("object key must not be empty"));
        }
        self.storage
            .validate()
            .context("invalid storage configuration")?;
        Ok(())
    }

    /// The object key, falling back to the source file name.
    pub fn object_key(&self) -> Result<String> {
        if let Some(key) = &self.key {
            return Ok(key.clone());
        }
        self.source
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive an object key from the source path"))
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn transfer_request(&self) -> Result<TransferRequest> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| anyhow!("no source file given"))?;
        let destination = ObjectDestination::new(&self.bucket, &self.object_key()?);
        Ok(TransferRequest::new(source, destination)
            .chunk_size(self.chunk_size)
            .ensure_bucket(self.ensure_bucket)
            .deadline(self.deadline()))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    const CONFIG: &str = r#"
storage:
  account_id: abc123
  access_key_id: AKID
  secret_access_key: SECRET
  part_size: 16777216
bucket: media
source: /data/video.mp4
"#;

    fn load(jail: &Jail, overrides: &ConfigOverrides) -> UploaderConfig {
        let path = jail.directory().join("config.yaml");
        UploaderConfig::load(Some(&path), overrides).unwrap()
    }

    #[test]
    fn test_file_only() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", CONFIG)?;
            let config = load(jail, &ConfigOverrides::default());

            assert_eq!(config.bucket, "media");
            assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
            assert!(config.ensure_bucket);
            assert_eq!(config.storage.part_size, 16 * 1024 * 1024);
            assert_eq!(config.storage.region, "auto");
            assert_eq!(
                config.storage.endpoint(),
                "https://abc123.r2.cloudflarestorage.com"
            );
            assert_eq!(config.object_key().unwrap(), "video.mp4");
            assert_eq!(config.deadline(), None);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file_and_flags_override_env() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", CONFIG)?;
            jail.set_env("R2_STREAM_BUCKET", "from-env");
            jail.set_env("R2_STREAM_CHUNK_SIZE", "4096");
            jail.set_env("R2_STREAM_STORAGE__SECRET_ACCESS_KEY", "ENVSECRET");

            let config = load(jail, &ConfigOverrides::default());
            assert_eq!(config.bucket, "from-env");
            assert_eq!(config.chunk_size, 4096);
            assert_eq!(config.storage.credentials.secret_access_key, "ENVSECRET");
            assert_eq!(config.storage.credentials.access_key_id, "AKID");

            let overrides = ConfigOverrides {
                bucket: Some("from-flag".to_string()),
                key: Some("videos/intro.mp4".to_string()),
                account_id: Some("def456".to_string()),
                skip_bucket_check: true,
                deadline_secs: Some(30),
                ..Default::default()
            };
            let config = load(jail, &overrides);
            assert_eq!(config.bucket, "from-flag");
            assert_eq!(config.chunk_size, 4096);
            assert_eq!(config.object_key().unwrap(), "videos/intro.mp4");
            assert_eq!(config.storage.credentials.account_id, "def456");
            assert!(!config.ensure_bucket);
            assert_eq!(config.deadline(), Some(Duration::from_secs(30)));
            Ok(())
        });
    }

    #[test]
    fn test_missing_bucket_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                "storage:\n  account_id: abc\n  access_key_id: a\n  secret_access_key: s\nsource: /tmp/a.bin\n",
            )?;
            let path = jail.directory().join("config.yaml");
            let err = UploaderConfig::load(Some(&path), &ConfigOverrides::default()).unwrap_err();
            assert!(err.to_string().contains("bucket"));
            Ok(())
        });
    }

    #[test]
    fn test_flags_without_file() {
        Jail::expect_with(|jail| {
            jail.set_env("R2_STREAM_STORAGE__ACCESS_KEY_ID", "AKID");
            jail.set_env("R2_STREAM_STORAGE__SECRET_ACCESS_KEY", "SECRET");
            let overrides = ConfigOverrides {
                source: Some(PathBuf::from("/srv/backups/db.tar")),
                bucket: Some("backups".to_string()),
                account_id: Some("abc123".to_string()),
                chunk_size: Some(65536),
                ..Default::default()
            };

            let config = UploaderConfig::load(None, &overrides).unwrap();
            let request = config.transfer_request().unwrap();
            assert_eq!(request.destination, ObjectDestination::new("backups", "db.tar"));
            assert_eq!(request.chunk_size, 65536);
            assert!(request.ensure_bucket);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_storage_config_is_rejected() {
        let config = UploaderConfig {
            bucket: "media".to_string(),
            source: Some(PathBuf::from("/tmp/a.bin")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
