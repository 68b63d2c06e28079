use std::fs;
use tracing::warn;

use crate::DEFAULT_PORT;

pub const DEFAULT_CONFIG_PATH: &str = "./redis.conf";
pub const DEFAULT_APPEND_FILENAME: &str = "appendonly.aof";

/// How eagerly the append-only log is flushed to disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsyncStrategy {
    /// fsync after every persisted command.
    Always,
    /// Background fsync once per second.
    EverySec,
    /// Leave flushing to the OS page cache.
    No,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub append_only: bool,
    pub append_filename: String,
    pub append_fsync: FsyncStrategy,
    /// Rewrite the log once this many commands were persisted since the last
    /// rewrite. A value <= 1 disables rewriting.
    pub auto_aof_rewrite_after_cmds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            append_only: false,
            append_filename: DEFAULT_APPEND_FILENAME.to_string(),
            append_fsync: FsyncStrategy::No,
            auto_aof_rewrite_after_cmds: 0,
        }
    }
}

impl ServerConfig {
    /// Reads the configuration file, falling back to the defaults when the
    /// file is missing or unreadable.
    pub fn load(path: Option<&str>) -> Self {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) => {
                warn!(%path, cause = %err, "config file unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Line-oriented format: `#` starts a comment, every other non-empty line
    /// is `key<space>value`. Unrecognized keys and bad values are skipped.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                warn!(%line, "config line has no value, skipping");
                continue;
            };
            let value = value.trim();
            match key {
                "bind" => config.bind = value.to_string(),
                "port" => match value.parse() {
                    Ok(port) => config.port = port,
                    Err(_) => warn!(%value, "invalid port, keeping default"),
                },
                "appendonly" => config.append_only = value.eq_ignore_ascii_case("yes"),
                "appendfilename" => config.append_filename = value.to_string(),
                "appendfsync" => match value {
                    "always" => config.append_fsync = FsyncStrategy::Always,
                    "everysec" => config.append_fsync = FsyncStrategy::EverySec,
                    "no" => config.append_fsync = FsyncStrategy::No,
                    _ => warn!(%value, "invalid appendfsync value, keeping default"),
                },
                "auto-aof-rewrite-after-cmds" => match value.parse() {
                    Ok(n) => config.auto_aof_rewrite_after_cmds = n,
                    Err(_) => warn!(%value, "invalid rewrite threshold, keeping default"),
                },
                _ => warn!(%key, "unrecognized config key, skipping"),
            }
        }
        config
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6379);
        assert!(!config.append_only);
        assert_eq!(config.append_fsync, FsyncStrategy::No);
        assert_eq!(config.auto_aof_rewrite_after_cmds, 0);
    }

    #[test]
    fn parses_full_file() {
        let content = "\
# sample configuration
bind 127.0.0.1
port 7000
appendonly yes
appendfilename data.aof
appendfsync everysec
auto-aof-rewrite-after-cmds 100
";
        let config = ServerConfig::parse(content);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 7000);
        assert!(config.append_only);
        assert_eq!(config.append_filename, "data.aof");
        assert_eq!(config.append_fsync, FsyncStrategy::EverySec);
        assert_eq!(config.auto_aof_rewrite_after_cmds, 100);
        assert_eq!(config.address(), "127.0.0.1:7000");
    }

    #[test]
    fn skips_comments_and_garbage() {
        let content = "\
# port 9999
port not-a-number
appendfsync sometimes
unknown-key 1
port 6400
";
        let config = ServerConfig::parse(content);
        assert_eq!(config.port, 6400);
        assert_eq!(config.append_fsync, FsyncStrategy::No);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load(Some("/nonexistent/redis.conf"));
        assert_eq!(config.port, 6379);
    }
}
