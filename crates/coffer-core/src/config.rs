//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the ingestion pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the temp-upload subtree (chunk directories and assembled
    /// files live here).
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Root of permanent storage (module subtrees live here).
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Maximum accepted size for a single chunk, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Hard ceiling on a declared total upload size, in bytes. Enforced
    /// before assembly touches disk so spoofed metadata cannot force
    /// unbounded resource use.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum number of assemblies running concurrently.
    #[serde(default = "default_max_concurrent_assemblies")]
    pub max_concurrent_assemblies: usize,
    /// Interval between cleanup sweeper runs, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum idle age before a session is reaped, in seconds.
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./data/temp_uploads")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/storage")
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    crate::DEFAULT_MAX_FILE_SIZE
}

fn default_max_concurrent_assemblies() -> usize {
    4
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_session_idle_timeout_secs() -> u64 {
    3600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            storage_root: default_storage_root(),
            max_chunk_size: default_max_chunk_size(),
            max_file_size: default_max_file_size(),
            max_concurrent_assemblies: default_max_concurrent_assemblies(),
            sweep_interval_secs: default_sweep_interval_secs(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    /// Build a config rooted at one directory, placing the temp and
    /// storage subtrees under it. Convenient for tests.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            temp_dir: root.join("temp_uploads"),
            storage_root: root.join("storage"),
            ..Self::default()
        }
    }

    /// Sweeper tick interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Session idle timeout.
    pub fn session_idle_timeout(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_idle_timeout_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }
}
