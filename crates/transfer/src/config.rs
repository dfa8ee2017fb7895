//! Transfer tunables.
//!
//! Read from `commons-client/config.json` under `$XDG_CONFIG_HOME` (Linux),
//! `%APPDATA%` (Windows) or `~/.config` when present, then overridden from the environment:
//! - `COMMONS_MAX_THREADS`
//! - `COMMONS_PART_SIZE`
//! - `COMMONS_DOWNLOAD_CHUNK_SIZE`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::{DEFAULT_DOWNLOAD_CHUNK_SIZE, DEFAULT_PART_SIZE, MAX_PART_COUNT, MIN_PART_SIZE};

const APP_DIR: &str = "commons-client";

/// Tunables shared by the upload and download engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferConfig {
    /// Concurrent part uploads, and fetch/write threads per download.
    pub max_threads: usize,
    pub upload_part_size: u64,
    pub min_part_size: u64,
    pub max_part_count: u64,
    pub download_chunk_size: u64,
    /// Full attempts of the multipart upload before giving up.
    pub max_upload_attempts: u32,
    pub retry: RetryPolicy,
    pub multithreaded_download: bool,
    pub max_redirects: u32,
}

fn default_max_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(16)
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            upload_part_size: DEFAULT_PART_SIZE,
            min_part_size: MIN_PART_SIZE,
            max_part_count: MAX_PART_COUNT,
            download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            max_upload_attempts: 7,
            retry: RetryPolicy::default(),
            multithreaded_download: true,
            max_redirects: 5,
        }
    }
}

impl TransferConfig {
    /// Loads the user config file, falling back to defaults, then applies
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path`. Unparseable content logs a warning and yields defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => Ok(config.normalized()),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse transfer config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Applies overrides looked up through `var`. Invalid values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let parse = |key: &str| -> Option<u64> {
            let raw = var(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => Some(v),
                _ => {
                    tracing::warn!(key, value = %raw, "ignoring invalid override");
                    None
                }
            }
        };
        if let Some(v) = parse("COMMONS_MAX_THREADS") {
            self.max_threads = v as usize;
        }
        if let Some(v) = parse("COMMONS_PART_SIZE") {
            self.upload_part_size = v;
        }
        if let Some(v) = parse("COMMONS_DOWNLOAD_CHUNK_SIZE") {
            self.download_chunk_size = v;
        }
        *self = std::mem::take(self).normalized();
    }

    fn normalized(mut self) -> Self {
        self.max_threads = self.max_threads.max(1);
        self.max_upload_attempts = self.max_upload_attempts.max(1);
        self.download_chunk_size = self.download_chunk_size.max(1);
        self
    }
}

/// Per-user directory holding the client's config files.
pub fn config_dir() -> Option<PathBuf> {
    config_base_dir().map(|d| d.join(APP_DIR))
}

fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.json"))
}

fn config_base_dir() -> Option<PathBuf> {
    base_dir_from(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

/// Platform config root, with variables looked up through `var`.
fn base_dir_from(var: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| var("HOME").map(|h| PathBuf::from(h).join(".config")))
    }

    #[cfg(target_os = "windows")]
    {
        var("APPDATA").map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        var("HOME").map(|h| PathBuf::from(h).join(".config"))
    }
}
