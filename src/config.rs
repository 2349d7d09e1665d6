use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

/// Byte budget and timing knobs for the pairing and relay server.
///
/// Every field has a default matching spec §6's Configuration table; each
/// can be overridden via environment variable (`ServerConfig::from_env`)
/// or a TOML file (`ServerConfig::from_toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    /// Size of one file chunk, used to estimate transfer size when the
    /// sender omits `totalSize`.
    pub chunk_size: u64,
    /// Hard cap on the effective size of a single file transfer.
    pub max_file_size: u64,
    /// Max number of files per session in `sending`/`paused` status.
    pub max_simultaneous_files: usize,
    /// Retries for a single chunk forward before pausing the transfer.
    pub chunk_retry_limit: u32,

    pub file_cleanup_timeout_secs: u64,
    pub pair_cleanup_timeout_secs: u64,
    pub mint_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// How often the per-session reaper sweeps files and idle pairs.
    pub reaper_interval_secs: u64,

    pub shutdown_timeout_secs: u64,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5050".parse().unwrap(),
            chunk_size: 64 * 1024,
            max_file_size: 5 * 1024 * 1024 * 1024,
            max_simultaneous_files: 5,
            chunk_retry_limit: 3,
            file_cleanup_timeout_secs: 30 * 60,
            pair_cleanup_timeout_secs: 12 * 60 * 60,
            mint_ttl_secs: 2 * 60,
            heartbeat_interval_secs: 30,
            reaper_interval_secs: 60,
            shutdown_timeout_secs: 30,
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.parse()?;
            config.bind_addr.set_port(port);
        }

        if let Ok(v) = std::env::var("CHUNK_SIZE") {
            config.chunk_size = v.parse()?;
        }

        if let Ok(v) = std::env::var("MAX_FILE_SIZE") {
            config.max_file_size = v.parse()?;
        }

        if let Ok(v) = std::env::var("MAX_SIMULTANEOUS_FILES") {
            config.max_simultaneous_files = v.parse()?;
        }

        if let Ok(v) = std::env::var("CHUNK_RETRY_LIMIT") {
            config.chunk_retry_limit = v.parse()?;
        }

        if let Ok(v) = std::env::var("FILE_CLEANUP_TIMEOUT") {
            config.file_cleanup_timeout_secs = v.parse()?;
        }

        if let Ok(v) = std::env::var("PAIR_CLEANUP_TIMEOUT") {
            config.pair_cleanup_timeout_secs = v.parse()?;
        }

        if let Ok(v) = std::env::var("HEARTBEAT_INTERVAL") {
            config.heartbeat_interval_secs = v.parse()?;
        }

        if let Ok(v) = std::env::var("DEBUG") {
            config.debug = matches!(v.as_str(), "1" | "true" | "TRUE" | "True");
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be > 0");
        }
        if self.max_file_size == 0 {
            anyhow::bail!("max_file_size must be > 0");
        }
        if self.max_simultaneous_files == 0 {
            anyhow::bail!("max_simultaneous_files must be > 0");
        }
        if self.chunk_retry_limit == 0 {
            anyhow::bail!("chunk_retry_limit must be > 0");
        }
        Ok(())
    }

    pub fn file_cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.file_cleanup_timeout_secs)
    }

    pub fn pair_cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.pair_cleanup_timeout_secs)
    }

    pub fn mint_ttl(&self) -> Duration {
        Duration::from_secs(self.mint_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Maximum size in MB, used in the "File too large" error message.
    pub fn max_file_size_mb(&self) -> u64 {
        self.max_file_size / (1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_budget() {
        let config = ServerConfig::default();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.max_file_size, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.max_simultaneous_files, 5);
        assert_eq!(config.chunk_retry_limit, 3);
        assert_eq!(config.max_file_size_mb(), 5120);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = ServerConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
