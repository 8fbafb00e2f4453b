//! Pipeline configuration
//!
//! Loaded from a JSON file when one exists, defaults otherwise. Every field
//! has a default so a partial file is enough.

use crate::pipeline::TransformKind;
use crate::tee::{Algorithm, KeySize, TeeError, AES_BLOCK_SIZE, DATA_BLOCK_SIZE};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for one record-processing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Line-per-slot key file
    pub key_file: PathBuf,
    /// JSON record store
    pub record_file: PathBuf,
    /// Payload size of every record, in bytes
    pub block_size: usize,
    pub algorithm: Algorithm,
    pub key_size: KeySize,
    /// Hex-encoded IV, one AES block
    pub iv: String,
    /// Which transform command processes records
    pub transform: TransformKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("key.txt"),
            record_file: PathBuf::from("records.json"),
            block_size: DATA_BLOCK_SIZE,
            algorithm: Algorithm::Ctr,
            key_size: KeySize::Aes128,
            iv: hex::encode([0u8; AES_BLOCK_SIZE]),
            transform: TransformKind::Data,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TeeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| TeeError::Config(format!("Read {}: {}", path.display(), e)))?;
        let config: PipelineConfig = serde_json::from_str(&json)
            .map_err(|e| TeeError::Config(format!("Parse {}: {}", path.display(), e)))?;
        config.validate()?;
        info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// `load` if the file exists, defaults if it does not
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, TeeError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TeeError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TeeError::Config(format!("Serialize: {}", e)))?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| TeeError::Config(format!("Write: {}", e)))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TeeError> {
        if self.block_size == 0 {
            return Err(TeeError::Config("block_size must be non-zero".into()));
        }
        self.iv_bytes()?;
        Ok(())
    }

    pub fn iv_bytes(&self) -> Result<[u8; AES_BLOCK_SIZE], TeeError> {
        let bytes = hex::decode(&self.iv)
            .map_err(|e| TeeError::Config(format!("iv is not hex: {}", e)))?;
        bytes.as_slice().try_into().map_err(|_| {
            TeeError::Config(format!(
                "iv must be {} bytes, got {}",
                AES_BLOCK_SIZE,
                bytes.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.block_size, 128);
        assert_eq!(config.key_size, KeySize::Aes128);
        assert_eq!(config.iv_bytes().unwrap(), [0u8; 16]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "block_size": 64, "key_size": "aes256", "transform": "buffer" }"#)
                .unwrap();
        assert_eq!(config.block_size, 64);
        assert_eq!(config.key_size, KeySize::Aes256);
        assert_eq!(config.transform, TransformKind::Buffer);
        assert_eq!(config.algorithm, Algorithm::Ctr);
        assert_eq!(config.key_file, PathBuf::from("key.txt"));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = PipelineConfig::default();
        config.iv = "abcd".into();
        assert!(matches!(config.validate(), Err(TeeError::Config(_))));

        config.iv = "zz".repeat(16);
        assert!(matches!(config.iv_bytes(), Err(TeeError::Config(_))));

        let config = PipelineConfig {
            block_size: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("teecrypt-config-{}.json", uuid::Uuid::new_v4()));
        let config = PipelineConfig {
            block_size: 32,
            iv: "01".repeat(16),
            ..PipelineConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.iv_bytes().unwrap(), [1u8; 16]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("teecrypt-missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(PipelineConfig::load_or_default(&path).unwrap(), PipelineConfig::default());
    }
}
