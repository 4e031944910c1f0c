use crate::service::ServiceConfig;
use chrono::TimeDelta;
use std::path::PathBuf;

/// Number of events shown on the dashboard.
const DASHBOARD_RECENT: usize = 5;
const DEFAULT_DEDUP_WINDOW_SECS: i64 = 300;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the cascade XML and the optional ONNX model.
    pub model_dir: PathBuf,
    /// Haar cascade XML (required).
    pub cascade_path: PathBuf,
    /// SSD face model; `None` disables the deep pass.
    pub dnn_model_path: Option<PathBuf>,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory where registered photos are copied.
    pub upload_dir: PathBuf,
    /// Similarity a match must exceed.
    pub match_threshold: f32,
    /// Window for suppressing repeated live-recognition events.
    pub dedup_window: TimeDelta,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let cascade_path = var("ROLLCALL_CASCADE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join(rollcall_core::CASCADE_FILE_NAME));

        // An explicitly empty value turns the deep detector off.
        let dnn_model_path = match var("ROLLCALL_DNN_MODEL_PATH") {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(model_dir.join(rollcall_core::DNN_MODEL_FILE_NAME)),
        };

        Self {
            cascade_path,
            dnn_model_path,
            db_path: var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("attendance.db")),
            upload_dir: var("ROLLCALL_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("uploads")),
            match_threshold: parse_or(
                var("ROLLCALL_MATCH_THRESHOLD"),
                rollcall_core::DEFAULT_ACCEPTANCE_THRESHOLD,
            ),
            dedup_window: dedup_window(var("ROLLCALL_DEDUP_WINDOW_SECS")),
            bus: match var("ROLLCALL_BUS").as_deref() {
                Some("system") => BusKind::System,
                _ => BusKind::Session,
            },
            model_dir,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            upload_dir: self.upload_dir.clone(),
            match_threshold: self.match_threshold,
            dedup_window: self.dedup_window,
            dashboard_recent: DASHBOARD_RECENT,
        }
    }
}

/// Dedup window in whole seconds; values a `TimeDelta` cannot hold fall back
/// to the default.
fn dedup_window(value: Option<String>) -> TimeDelta {
    let default = TimeDelta::seconds(DEFAULT_DEDUP_WINDOW_SECS);
    let Some(raw) = value else {
        return default;
    };
    let window = raw
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(TimeDelta::try_seconds);
    window.unwrap_or_else(|| {
        tracing::warn!(
            value = %raw,
            default_secs = DEFAULT_DEDUP_WINDOW_SECS,
            "invalid ROLLCALL_DEDUP_WINDOW_SECS; using default"
        );
        default
    })
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_under_xdg_data_home() {
        let config = config_from(&[("XDG_DATA_HOME", "/data")]);
        assert_eq!(config.model_dir, PathBuf::from("/data/rollcall/models"));
        assert_eq!(
            config.cascade_path,
            PathBuf::from("/data/rollcall/models/haarcascade_frontalface_default.xml")
        );
        assert_eq!(
            config.dnn_model_path,
            Some(PathBuf::from("/data/rollcall/models/res10_300x300_ssd.onnx"))
        );
        assert_eq!(config.db_path, PathBuf::from("/data/rollcall/attendance.db"));
        assert_eq!(config.upload_dir, PathBuf::from("/data/rollcall/uploads"));
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.dedup_window, TimeDelta::seconds(300));
        assert_eq!(config.bus, BusKind::Session);
    }

    #[test]
    fn test_home_fallback() {
        let config = config_from(&[("HOME", "/home/ada")]);
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.local/share/rollcall/attendance.db"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("ROLLCALL_MODEL_DIR", "/models"),
            ("ROLLCALL_DNN_MODEL_PATH", ""),
            ("ROLLCALL_MATCH_THRESHOLD", "0.75"),
            ("ROLLCALL_DEDUP_WINDOW_SECS", "60"),
            ("ROLLCALL_BUS", "system"),
        ]);
        assert_eq!(
            config.cascade_path,
            PathBuf::from("/models/haarcascade_frontalface_default.xml")
        );
        assert_eq!(config.dnn_model_path, None);
        assert_eq!(config.match_threshold, 0.75);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.service_config().dedup_window, TimeDelta::seconds(60));
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let config = config_from(&[
            ("ROLLCALL_MATCH_THRESHOLD", "high"),
            ("ROLLCALL_DEDUP_WINDOW_SECS", "-5"),
        ]);
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.dedup_window, TimeDelta::seconds(300));
    }

    #[test]
    fn test_out_of_range_dedup_window_falls_back() {
        for value in ["18446744073709551615", "9300000000000000", "99999999999999999999"] {
            let config = config_from(&[("ROLLCALL_DEDUP_WINDOW_SECS", value)]);
            assert_eq!(config.dedup_window, TimeDelta::seconds(300), "value {value}");
        }

        // Large but representable windows are kept as given.
        let config = config_from(&[("ROLLCALL_DEDUP_WINDOW_SECS", "100000000000000")]);
        assert_eq!(config.dedup_window, TimeDelta::seconds(100_000_000_000_000));
    }
}
