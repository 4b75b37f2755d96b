use chrono::Duration;
use gatehouse_core::ledger::DEFAULT_COOLDOWN_MINUTES;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
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

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

/// Optional settings file (`GATEHOUSE_CONFIG`). Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub cooldown_minutes: Option<i64>,
    pub frame_skip: Option<u32>,
    pub detect_scale: Option<f32>,
    pub bus: Option<BusKind>,
    pub warmup_frames: Option<usize>,
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

/// Daemon configuration: environment over config file over defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean embedding distance below which a face is accepted as a
    /// catalog match. Must be finite and positive.
    ///
    /// Embeddings are L2-normalized, so distance d corresponds to cosine
    /// similarity 1 - d²/2. The default 0.6 therefore demands cosine >= 0.82,
    /// which is strict for ArcFace (same-person pairs commonly sit around
    /// 0.4-0.7 cosine, i.e. distance 0.77-1.10). Raise it toward 1.0 if
    /// residents are routinely reported as unrecognized.
    pub match_threshold: f32,
    /// Minimum minutes between accepted IN/OUT transitions for one person.
    pub cooldown_minutes: i64,
    /// Run recognition on every Nth frame.
    pub frame_skip: u32,
    /// Downscale factor applied before detection.
    pub detect_scale: f32,
    pub bus: BusKind,
    /// Frames discarded after the camera opens (auto-exposure settling).
    pub warmup_frames: usize,
}

impl Config {
    /// Load from `GATEHOUSE_*` environment variables, seeded from `GATEHOUSE_CONFIG` if set.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("GATEHOUSE_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Merge `file` with variables looked up through `env`.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("gatehouse");

        let model_dir = env("GATEHOUSE_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let db_path = env("GATEHOUSE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("gatehouse.db"));

        let bus = match env("GATEHOUSE_BUS").as_deref() {
            Some("session") => BusKind::Session,
            Some("system") => BusKind::System,
            _ => file.bus.unwrap_or(BusKind::System),
        };

        let frame_skip = parsed(&env, "GATEHOUSE_FRAME_SKIP")
            .or(file.frame_skip)
            .unwrap_or(10)
            .max(1);

        let detect_scale = parsed(&env, "GATEHOUSE_DETECT_SCALE")
            .or(file.detect_scale)
            .unwrap_or(0.25);
        let detect_scale = if detect_scale > 0.0 && detect_scale.is_finite() {
            detect_scale.min(1.0)
        } else {
            1.0
        };

        Self {
            camera_device: env("GATEHOUSE_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            db_path,
            match_threshold: parsed(&env, "GATEHOUSE_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .filter(|t: &f32| t.is_finite() && *t > 0.0)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            cooldown_minutes: parsed(&env, "GATEHOUSE_COOLDOWN_MINUTES")
                .or(file.cooldown_minutes)
                .filter(|&m: &i64| m >= 0 && Duration::try_minutes(m).is_some())
                .unwrap_or(DEFAULT_COOLDOWN_MINUTES),
            frame_skip,
            detect_scale,
            bus,
            warmup_frames: parsed(&env, "GATEHOUSE_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(0),
        }
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(FileConfig::default(), env(&[("HOME", "/home/guard")]));
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!(cfg.db_path, PathBuf::from("/home/guard/.local/share/gatehouse/gatehouse.db"));
        assert_eq!(cfg.model_dir, PathBuf::from("/home/guard/.local/share/gatehouse/models"));
        assert_eq!(cfg.match_threshold, 0.6);
        assert_eq!(cfg.cooldown_minutes, 10);
        assert_eq!(cfg.frame_skip, 10);
        assert_eq!(cfg.detect_scale, 0.25);
        assert_eq!(cfg.bus, BusKind::System);
        assert_eq!(cfg.warmup_frames, 0);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            camera_device = "/dev/video4"
            match_threshold = 0.5
            frame_skip = 5
            bus = "session"
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(
            file,
            env(&[("GATEHOUSE_MATCH_THRESHOLD", "0.45"), ("GATEHOUSE_COOLDOWN_MINUTES", "15")]),
        );
        assert_eq!(cfg.camera_device, "/dev/video4");
        assert_eq!(cfg.match_threshold, 0.45);
        assert_eq!(cfg.cooldown_minutes, 15);
        assert_eq!(cfg.frame_skip, 5);
        assert_eq!(cfg.bus, BusKind::Session);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = Config::resolve(
            FileConfig::default(),
            env(&[
                ("GATEHOUSE_MATCH_THRESHOLD", "close"),
                ("GATEHOUSE_FRAME_SKIP", "0"),
                ("GATEHOUSE_DETECT_SCALE", "-2"),
            ]),
        );
        assert_eq!(cfg.match_threshold, 0.6);
        assert_eq!(cfg.frame_skip, 1);
        assert_eq!(cfg.detect_scale, 1.0);
    }

    #[test]
    fn test_unusable_threshold_falls_back() {
        for bad in ["NaN", "inf", "-0.3", "0"] {
            let cfg = Config::resolve(
                FileConfig::default(),
                env(&[("GATEHOUSE_MATCH_THRESHOLD", bad)]),
            );
            assert_eq!(cfg.match_threshold, DEFAULT_MATCH_THRESHOLD, "threshold {bad}");
        }
        let file = FileConfig { match_threshold: Some(f32::NAN), ..FileConfig::default() };
        assert_eq!(Config::resolve(file, env(&[])).match_threshold, DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_out_of_range_cooldown_falls_back() {
        for bad in ["200000000000000", "-5", "9223372036854775807"] {
            let cfg = Config::resolve(
                FileConfig::default(),
                env(&[("GATEHOUSE_COOLDOWN_MINUTES", bad)]),
            );
            assert_eq!(cfg.cooldown_minutes, DEFAULT_COOLDOWN_MINUTES, "cooldown {bad}");
            // Must not panic when the engine builds the window.
            assert_eq!(crate::engine::cooldown(cfg.cooldown_minutes).num_minutes(), 10);
        }
        let cfg = Config::resolve(FileConfig::default(), env(&[("GATEHOUSE_COOLDOWN_MINUTES", "0")]));
        assert_eq!(cfg.cooldown_minutes, 0);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video1\"").is_err());
    }
}
