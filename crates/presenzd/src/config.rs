use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the encoding sealing key file.
    pub key_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum accepted match distance. Lower = stricter.
    pub tolerance: f32,
    /// Minimum seconds between consecutive accepted events per identity.
    pub min_gap_secs: u64,
    /// Timeout in seconds for one recognize request.
    pub recognize_timeout_secs: u64,
    /// Whether to apply the screen-replay heuristic to probe captures.
    pub liveness_enabled: bool,
}

impl Config {
    /// Load configuration from `PRESENZ_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presenz");

        let db_path = std::env::var("PRESENZ_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let key_path = std::env::var("PRESENZ_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("sealing.key"));

        let model_dir = std::env::var("PRESENZ_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| presenz_core::default_model_dir());

        Self {
            db_path,
            key_path,
            model_dir,
            tolerance: env_f32("PRESENZ_TOLERANCE", 0.40),
            min_gap_secs: env_u64(
                "PRESENZ_MIN_GAP_SECS",
                presenz_core::resolver::DEFAULT_MIN_GAP_SECS,
            ),
            recognize_timeout_secs: env_u64("PRESENZ_RECOGNIZE_TIMEOUT_SECS", 10),
            liveness_enabled: std::env::var("PRESENZ_LIVENESS")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }

    /// Path to the RFB-320 detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("rfb320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the MobileFaceNet embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("mfn_128.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
