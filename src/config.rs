use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where registered dump files live. Registration copies the source file
/// here so the original upload can disappear without breaking ingestion.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

/// Process-wide encryption key material. Exactly one of `key` (64 hex
/// chars) or `passphrase` (SHA-256-derived) must be set. The key is read
/// once at startup and injected into the cipher — never mutated at runtime.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl EncryptionConfig {
    pub fn key_bytes(&self) -> Result<[u8; 32]> {
        if let Some(hex_key) = &self.key {
            let bytes = hex::decode(hex_key).context("encryption.key is not valid hex")?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("encryption.key must be 32 bytes (64 hex chars)"))?;
            return Ok(bytes);
        }
        if let Some(passphrase) = &self.passphrase {
            let digest = Sha256::digest(passphrase.as_bytes());
            return Ok(digest.into());
        }
        anyhow::bail!("either encryption.key or encryption.passphrase must be set")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            preview_rows: default_preview_rows(),
        }
    }
}

fn default_batch_size() -> usize {
    5000
}
fn default_preview_rows() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    if config.encryption.key.is_some() && config.encryption.passphrase.is_some() {
        anyhow::bail!("set either encryption.key or encryption.passphrase, not both");
    }

    // Fail on malformed key material at startup, not mid-ingestion.
    config.encryption.key_bytes()?;

    Ok(config)
}
