use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub face_index: FaceIndexConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("startline")
        .join("startline.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OcrProviderType {
    /// Remote OpenAI-compatible vision endpoint (high accuracy).
    OpenAI,
    /// Local OpenAI-compatible endpoint such as LM Studio.
    #[default]
    LmStudio,
    /// Local Ollama instance.
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub provider: OcrProviderType,

    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_ocr_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_ocr_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_ocr_model() -> String {
    "gemma-3-4b".to_string()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: OcrProviderType::default(),
            endpoint: default_ocr_endpoint(),
            model: default_ocr_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceIndexConfig {
    /// Minimum similarity (percent) for a search hit. Hard cutoff: a wrong
    /// bib assignment is worse than a missed one, so this sits high.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Maximum matches returned by one similarity search.
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,

    /// Minimum detection confidence for enrolling a face.
    #[serde(default = "default_min_face_confidence")]
    pub min_face_confidence: f32,
}

fn default_similarity_threshold() -> f32 {
    90.0
}

fn default_max_matches() -> usize {
    50
}

fn default_min_face_confidence() -> f32 {
    0.7
}

impl Default for FaceIndexConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_matches: default_max_matches(),
            min_face_confidence: default_min_face_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Quiet period after the last photo completion before a clustering run
    /// fires. A burst of uploads inside this window collapses to one run.
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,
}

fn default_quiet_period_secs() -> u64 {
    30
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            quiet_period_secs: default_quiet_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root directory watched for uploads; each subdirectory is an event id.
    #[serde(default = "default_events_root")]
    pub events_root: PathBuf,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_events_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("startline")
        .join("events")
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "webp".to_string(),
    ]
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            events_root: default_events_root(),
            image_extensions: default_image_extensions(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load from an explicit path, for the daemon's `--config` override.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("startline")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ocr.provider, OcrProviderType::LmStudio);
        assert!((config.face_index.similarity_threshold - 90.0).abs() < f32::EPSILON);
        assert_eq!(config.clustering.quiet_period_secs, 30);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[clustering]\nquiet_period_secs = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.clustering.quiet_period_secs, 5);
        // Untouched sections come back as defaults
        assert_eq!(config.face_index.max_matches, 50);
        assert_eq!(config.ocr.endpoint, "http://127.0.0.1:1234/v1");
    }
}
