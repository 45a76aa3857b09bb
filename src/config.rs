//! Server configuration: validated fields with TOML file loading.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StrandError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database directory; every durable artifact lives under it.
    pub db_path: PathBuf,
    pub page_size: u32,
    pub inline_threshold: u32,
    /// Fsync coalescing window for the WAL append path.
    pub group_commit_max_latency_ms: u32,
    /// Reserved for the page cache.
    pub cache_bytes: u64,
    pub listen_address: String,
    pub listen_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./strandkv_data"),
            page_size: 4096,
            inline_threshold: 1024,
            group_commit_max_latency_ms: 5,
            cache_bytes: 64 * 1024 * 1024,
            listen_address: "127.0.0.1".to_string(),
            listen_port: 6767,
        }
    }
}

impl Config {
    /// Defaults rooted at `db_path`.
    pub fn default_for(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML config file. Unknown keys are ignored;
    /// missing keys fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StrandError::Config(format!("read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| StrandError::Config(format!("parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(StrandError::Config(message));

        if self.db_path.as_os_str().is_empty() {
            return fail("db_path must not be empty".into());
        }
        if self.page_size == 0 {
            return fail("page_size must be positive".into());
        }
        if self.inline_threshold == 0 || self.inline_threshold >= self.page_size {
            return fail(format!(
                "inline_threshold must be within (0, {})",
                self.page_size
            ));
        }
        if self.group_commit_max_latency_ms == 0 {
            return fail("group_commit_max_latency_ms must be positive".into());
        }
        if self.cache_bytes == 0 {
            return fail("cache_bytes must be positive".into());
        }
        if self.listen_address.is_empty() {
            return fail("listen_address must not be empty".into());
        }
        if self.listen_port == 0 {
            return fail("listen_port must be positive".into());
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}
