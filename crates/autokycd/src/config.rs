use autokyc_core::{MatchSelection, ServiceSettings};
use autokyc_store::Rules;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DOCUMENT_CLASSES: [&str; 8] =
    ["CSB", "CSF", "DLB", "DLF", "NIDB", "NIDF", "PPB", "PPF"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional overrides from the TOML file named by `AUTOKYC_CONFIG_FILE`.
/// Keys are the environment names without the `AUTOKYC_` prefix, lowercased.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen_addr: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub document_model: Option<String>,
    pub document_classes: Option<Vec<String>>,
    pub face_detector_model: Option<String>,
    pub face_recognizer_model: Option<String>,
    pub db_path: Option<PathBuf>,
    pub db_pool_size: Option<usize>,
    pub photo_root: Option<PathBuf>,
    pub similarity_threshold: Option<f64>,
    pub face_match_threshold: Option<f32>,
    pub min_document_confidence: Option<f64>,
    pub match_selection: Option<MatchSelection>,
    pub step_timeout_secs: Option<u64>,
    pub max_upload_bytes: Option<usize>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Daemon configuration: `AUTOKYC_*` environment variables over the
/// optional config file over built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: 0.0.0.0:8000).
    pub listen_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub document_model: String,
    /// Raw detector label of each YOLO class id, in id order.
    pub document_classes: Vec<String>,
    pub face_detector_model: String,
    pub face_recognizer_model: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub db_pool_size: usize,
    /// Root directory of stored session photos.
    pub photo_root: PathBuf,
    /// Face-compare acceptance, percent.
    pub similarity_threshold: f64,
    /// Comparator cut-off, percent; target faces below it are unmatched.
    pub face_match_threshold: f32,
    /// Document acceptance floor, fraction.
    pub min_document_confidence: f64,
    pub match_selection: MatchSelection,
    /// Collaborator budget for one request.
    pub step_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load from the process environment and `AUTOKYC_CONFIG_FILE`, if set.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("AUTOKYC_CONFIG_FILE") {
            Ok(path) if !path.is_empty() => FileConfig::read(Path::new(&path))?,
            _ => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Layer `env` over `file` over defaults.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("autokyc");

        let document_classes = env("AUTOKYC_DOCUMENT_CLASSES")
            .map(|v| {
                v.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .or(file.document_classes)
            .unwrap_or_else(|| DEFAULT_DOCUMENT_CLASSES.map(String::from).to_vec());

        Self {
            listen_addr: env("AUTOKYC_LISTEN_ADDR")
                .or(file.listen_addr)
                .unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            model_dir: env("AUTOKYC_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(|| data_dir.join("models")),
            document_model: env("AUTOKYC_DOCUMENT_MODEL")
                .or(file.document_model)
                .unwrap_or_else(|| "document_yolo.onnx".to_string()),
            document_classes,
            face_detector_model: env("AUTOKYC_FACE_DETECTOR_MODEL")
                .or(file.face_detector_model)
                .unwrap_or_else(|| "det_10g.onnx".to_string()),
            face_recognizer_model: env("AUTOKYC_FACE_RECOGNIZER_MODEL")
                .or(file.face_recognizer_model)
                .unwrap_or_else(|| "w600k_r50.onnx".to_string()),
            db_path: env("AUTOKYC_DB_PATH")
                .map(PathBuf::from)
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("autokyc.db")),
            db_pool_size: parsed(&env, "AUTOKYC_DB_POOL_SIZE")
                .or(file.db_pool_size)
                .unwrap_or(4)
                .max(1),
            photo_root: env("AUTOKYC_PHOTO_ROOT")
                .map(PathBuf::from)
                .or(file.photo_root)
                .unwrap_or_else(|| data_dir.join("Photo")),
            similarity_threshold: parsed(&env, "AUTOKYC_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(80.0),
            face_match_threshold: parsed(&env, "AUTOKYC_FACE_MATCH_THRESHOLD")
                .or(file.face_match_threshold)
                .unwrap_or(0.0),
            min_document_confidence: parsed(&env, "AUTOKYC_MIN_DOCUMENT_CONFIDENCE")
                .or(file.min_document_confidence)
                .unwrap_or(0.5),
            match_selection: parsed(&env, "AUTOKYC_MATCH_SELECTION")
                .or(file.match_selection)
                .unwrap_or_default(),
            step_timeout_secs: parsed(&env, "AUTOKYC_STEP_TIMEOUT_SECS")
                .or(file.step_timeout_secs)
                .unwrap_or(20),
            max_upload_bytes: parsed(&env, "AUTOKYC_MAX_UPLOAD_BYTES")
                .or(file.max_upload_bytes)
                .unwrap_or(10 * 1024 * 1024),
        }
    }

    pub fn document_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.document_model)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.face_detector_model)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.face_recognizer_model)
    }

    pub fn rules(&self) -> Rules {
        Rules {
            min_document_confidence: self.min_document_confidence,
            similarity_threshold: self.similarity_threshold,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            step_timeout: Duration::from_secs(self.step_timeout_secs),
            match_selection: self.match_selection,
        }
    }
}

/// Parse an environment value; unparseable values are ignored with a warning.
fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
