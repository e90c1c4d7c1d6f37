//! TOML configuration.
//!
//! ```toml
//! [local]
//! dir = "./data/local"
//!
//! [data_source]
//! default = "local"          # local | hosted | rest
//!
//! [selection]
//! persist = true
//!
//! [hosted]
//! database_url = "sqlite:./data/hosted.db"
//! owner = "alice"            # optional; a login session overrides it
//! [hosted.bucket]
//! kind = "directory"
//! root = "./data/bucket"
//! public_url = "http://127.0.0.1:7340/files"
//!
//! [rest]
//! base_url = "http://127.0.0.1:7340"
//! timeout_secs = 30
//!
//! [auth.demo]
//! username = "demo"
//! password = "change-me"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! database_url = "sqlite:./data/server.db"
//! ```
//!
//! Only `[local]` is required. Which data sources can be selected follows
//! from which sections are present.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::DataSource;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub local: LocalConfig,
    #[serde(default)]
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub hosted: Option<HostedConfig>,
    #[serde(default)]
    pub rest: Option<RestConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSourceConfig {
    #[serde(default = "default_source")]
    pub default: String,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            default: default_source(),
        }
    }
}

fn default_source() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            persist: default_persist(),
        }
    }
}

fn default_persist() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostedConfig {
    pub database_url: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub bucket: Option<BucketConfig>,
}

impl HostedConfig {
    /// The configured bucket, or a directory bucket next to the local store.
    pub fn bucket_or_default(&self, local_dir: &Path) -> BucketConfig {
        self.bucket.clone().unwrap_or_else(|| {
            let root = local_dir.join("bucket");
            let public_url = format!("file://{}", root.display());
            BucketConfig::Directory { root, public_url }
        })
    }
}

/// Object storage for hosted images.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketConfig {
    Directory {
        root: PathBuf,
        public_url: String,
    },
    S3 {
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default)]
        public_url: Option<String>,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub demo: Option<DemoCredential>,
}

/// Optional fixed credential, tried last in the authentication chain.
#[derive(Debug, Deserialize, Clone)]
pub struct DemoCredential {
    pub username: String,
    pub password: String,
    #[serde(default = "default_demo_user_id")]
    pub user_id: String,
}

fn default_demo_user_id() -> String {
    "demo-user".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub database_url: String,
    /// Externally visible base URL; defaults to `http://<bind>`.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub bucket: Option<BucketConfig>,
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl ServerConfig {
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind))
            .trim_end_matches('/')
            .to_string()
    }

    /// The configured bucket, or a directory bucket served by `/files`.
    pub fn bucket_or_default(&self, local_dir: &Path) -> BucketConfig {
        self.bucket.clone().unwrap_or_else(|| BucketConfig::Directory {
            root: local_dir.join("server-files"),
            public_url: format!("{}/files", self.public_url()),
        })
    }
}

impl Config {
    /// Local-only configuration rooted at `dir`.
    pub fn minimal(dir: impl Into<PathBuf>) -> Self {
        Self {
            local: LocalConfig { dir: dir.into() },
            data_source: DataSourceConfig::default(),
            selection: SelectionConfig::default(),
            hosted: None,
            rest: None,
            auth: AuthConfig::default(),
            server: None,
        }
    }

    pub fn default_source(&self) -> Result<DataSource> {
        self.data_source
            .default
            .parse::<DataSource>()
            .map_err(anyhow::Error::msg)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.local.dir.as_os_str().is_empty() {
        anyhow::bail!("local.dir must not be empty");
    }

    config.default_source()?;

    if let Some(hosted) = &config.hosted {
        if hosted.database_url.trim().is_empty() {
            anyhow::bail!("hosted.database_url must not be empty");
        }
        if let Some(bucket) = &hosted.bucket {
            validate_bucket("hosted.bucket", bucket)?;
        }
    }

    if let Some(rest) = &config.rest {
        if rest.base_url.trim().is_empty() {
            anyhow::bail!("rest.base_url must not be empty");
        }
        if !rest.base_url.starts_with("http://") && !rest.base_url.starts_with("https://") {
            anyhow::bail!("rest.base_url must start with http:// or https://");
        }
        if rest.timeout_secs == 0 {
            anyhow::bail!("rest.timeout_secs must be > 0");
        }
    }

    if let Some(server) = &config.server {
        if server.database_url.trim().is_empty() {
            anyhow::bail!("server.database_url must not be empty");
        }
        if let Some(bucket) = &server.bucket {
            validate_bucket("server.bucket", bucket)?;
        }
    }

    Ok(())
}

fn validate_bucket(section: &str, bucket: &BucketConfig) -> Result<()> {
    match bucket {
        BucketConfig::Directory { root, public_url } => {
            if root.as_os_str().is_empty() {
                anyhow::bail!("{}.root must not be empty", section);
            }
            if public_url.trim().is_empty() {
                anyhow::bail!("{}.public_url must not be empty", section);
            }
        }
        BucketConfig::S3 { bucket, .. } => {
            if bucket.trim().is_empty() {
                anyhow::bail!("{}.bucket must not be empty", section);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_is_local_only() {
        let config: Config = toml::from_str("[local]\ndir = \"/tmp/nk\"\n").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.default_source().unwrap(), DataSource::Local);
        assert!(config.hosted.is_none());
        assert!(config.rest.is_none());
        assert!(config.selection.persist);
    }

    #[test]
    fn unknown_default_source_is_rejected() {
        let config: Config =
            toml::from_str("[local]\ndir = \"/tmp/nk\"\n[data_source]\ndefault = \"cloud\"\n")
                .unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("unknown data source 'cloud'"));
    }

    #[test]
    fn zero_rest_timeout_is_rejected() {
        let config: Config = toml::from_str(
            "[local]\ndir = \"/tmp/nk\"\n[rest]\nbase_url = \"http://x\"\ntimeout_secs = 0\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn bucket_kinds_parse() {
        let config: Config = toml::from_str(
            r#"
[local]
dir = "/tmp/nk"

[hosted]
database_url = "sqlite::memory:"

[hosted.bucket]
kind = "s3"
bucket = "note-images"
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        let hosted = config.hosted.unwrap();
        assert_eq!(
            hosted.bucket,
            Some(BucketConfig::S3 {
                bucket: "note-images".into(),
                region: "us-east-1".into(),
                endpoint_url: None,
                public_url: None,
            })
        );
    }

    #[test]
    fn example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/nk.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.server.unwrap().bind, "127.0.0.1:7340");
    }

    #[test]
    fn server_defaults_to_directory_bucket_under_files() {
        let server = ServerConfig {
            bind: "127.0.0.1:9999".into(),
            database_url: "sqlite::memory:".into(),
            public_url: None,
            bucket: None,
        };
        match server.bucket_or_default(Path::new("/data")) {
            BucketConfig::Directory { root, public_url } => {
                assert_eq!(root, PathBuf::from("/data/server-files"));
                assert_eq!(public_url, "http://127.0.0.1:9999/files");
            }
            other => panic!("unexpected bucket {:?}", other),
        }
    }
}
