//! Scan and keeper configuration types.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of files collected by a bulk scan before it stops.
pub const DEFAULT_SCAN_CAP: usize = 1_000;

/// Default size at or above which a file is tagged Demon (1 GiB).
pub const DEFAULT_DEMON_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Default age at or above which a file is tagged Ghost.
pub const DEFAULT_STALE_DAYS: u64 = 180;

/// Default lifetime of a swift-purge undo session.
pub const DEFAULT_PURGE_UNDO_WINDOW_SECS: u64 = 600;

/// Configuration for scanning operations.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Root path to scan.
    pub root: PathBuf,

    /// Maximum number of regular files to collect.
    #[builder(default = "DEFAULT_SCAN_CAP")]
    #[serde(default = "default_scan_cap")]
    pub cap: usize,

    /// Follow symbolic links.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Maximum depth to traverse (None = unlimited).
    #[builder(default)]
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Patterns to ignore (glob syntax, matched against the file name).
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Number of threads for scanning (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,
}

fn default_true() -> bool {
    true
}

fn default_scan_cap() -> usize {
    DEFAULT_SCAN_CAP
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref root) = self.root {
            if root.as_os_str().is_empty() {
                return Err("Root path cannot be empty".to_string());
            }
        } else {
            return Err("Root path is required".to_string());
        }
        if self.cap == Some(0) {
            return Err("Scan cap must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning a path with the bulk-mode cap.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cap: DEFAULT_SCAN_CAP,
            follow_symlinks: false,
            max_depth: None,
            ignore_patterns: Vec::new(),
            threads: 0,
            include_hidden: true,
        }
    }

    /// Replace the file-count cap.
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    /// Check if hidden files should be skipped.
    pub fn should_skip_hidden(&self, name: &str) -> bool {
        !self.include_hidden && name.starts_with('.')
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Settings for a keeper instance: where its durable state lives and the
/// classification policy it applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Directory holding the graveyard, the log and the whitelist.
    pub data_dir: PathBuf,

    /// Maximum files collected per scan.
    pub scan_cap: usize,

    /// Size in bytes at or above which a file is a Demon.
    pub demon_threshold: u64,

    /// Age in days at or above which a file is a Ghost.
    pub stale_days: u64,

    /// Seconds a swift-purge session stays undoable in bulk.
    pub purge_undo_window_secs: u64,

    /// Directories treated as pre-approved in addition to the user folders.
    pub safe_roots: Vec<PathBuf>,

    /// Additional directories that may never be scanned or touched.
    pub deny_roots: Vec<PathBuf>,

    /// Additional deny regexes matched against `/`-separated paths.
    pub deny_patterns: Vec<String>,

    /// Glob patterns skipped during scans.
    pub ignore_patterns: Vec<String>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scan_cap: DEFAULT_SCAN_CAP,
            demon_threshold: DEFAULT_DEMON_THRESHOLD,
            stale_days: DEFAULT_STALE_DAYS,
            purge_undo_window_secs: DEFAULT_PURGE_UNDO_WINDOW_SECS,
            safe_roots: Vec::new(),
            deny_roots: Vec::new(),
            deny_patterns: Vec::new(),
            ignore_patterns: Vec::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cryptkeeper")
}

impl KeeperConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cryptkeeper").join("config.toml"))
    }

    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir cannot be empty".into()));
        }
        if self.scan_cap == 0 {
            return Err(ConfigError::Invalid("scan_cap must be at least 1".into()));
        }
        Ok(())
    }

    /// Directory quarantined files are moved into.
    pub fn graveyard_root(&self) -> PathBuf {
        self.data_dir.join("graveyard")
    }

    /// Append-only custody log.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("graveyard.jsonl")
    }

    /// Persisted whitelist record.
    pub fn whitelist_path(&self) -> PathBuf {
        self.data_dir.join("whitelist.json")
    }

    /// Stale threshold as a duration. Absurd day counts saturate.
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_days.saturating_mul(24 * 60 * 60))
    }

    /// Swift-purge undo window as a duration.
    pub fn purge_undo_window(&self) -> Duration {
        Duration::from_secs(self.purge_undo_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_stale_days_saturate() {
        let config = KeeperConfig {
            stale_days: u64::MAX,
            ..KeeperConfig::default()
        };
        assert_eq!(config.stale_threshold(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_config_builder() {
        let config = ScanConfig::builder()
            .root("/home/user")
            .threads(4usize)
            .cap(50usize)
            .follow_symlinks(true)
            .build()
            .unwrap();

        assert_eq!(config.root, PathBuf::from("/home/user"));
        assert_eq!(config.threads, 4);
        assert_eq!(config.cap, 50);
        assert!(config.follow_symlinks);
    }

    #[test]
    fn test_builder_rejects_zero_cap() {
        let result = ScanConfig::builder().root("/home/user").cap(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_simple() {
        let config = ScanConfig::new("/home/user");
        assert_eq!(config.cap, DEFAULT_SCAN_CAP);
        assert!(!config.follow_symlinks);
        assert_eq!(config.with_cap(0).cap, 1);
    }

    #[test]
    fn test_should_skip_hidden() {
        let mut config = ScanConfig::new("/test");
        assert!(!config.should_skip_hidden(".git"));

        config.include_hidden = false;
        assert!(config.should_skip_hidden(".git"));
        assert!(!config.should_skip_hidden("src"));
    }

    #[test]
    fn test_keeper_paths() {
        let config = KeeperConfig::with_data_dir("/data/ck");
        assert_eq!(config.graveyard_root(), PathBuf::from("/data/ck/graveyard"));
        assert_eq!(config.log_path(), PathBuf::from("/data/ck/graveyard.jsonl"));
        assert_eq!(config.whitelist_path(), PathBuf::from("/data/ck/whitelist.json"));
        assert_eq!(config.stale_threshold(), Duration::from_secs(180 * 86_400));
    }

    #[test]
    fn test_load_missing_and_partial() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = KeeperConfig::load(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(missing.scan_cap, DEFAULT_SCAN_CAP);

        let path = temp.path().join("config.toml");
        fs::write(&path, "data_dir = \"/srv/ck\"\nstale_days = 30\n").unwrap();
        let loaded = KeeperConfig::load(&path).unwrap();
        assert_eq!(loaded.data_dir, PathBuf::from("/srv/ck"));
        assert_eq!(loaded.stale_days, 30);
        assert_eq!(loaded.demon_threshold, DEFAULT_DEMON_THRESHOLD);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "scan_cap = \"lots\"").unwrap();
        assert!(matches!(
            KeeperConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
