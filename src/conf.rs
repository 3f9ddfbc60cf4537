//! The Serializable configuration data structures used for setup.
use std::{fs, net::SocketAddr, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sizes fixed at poller creation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConf {
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    #[serde(default = "default_max_datagrams")]
    pub max_datagrams: usize,

    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
}

impl PollerConf {
    pub fn validate(&self) -> Result<()> {
        check_size("max_events", self.max_events, i32::MAX as usize)?;
        // epoll_wait and recvmmsg both report their count as a c_int
        check_size("max_datagrams", self.max_datagrams, i32::MAX as usize)?;
        check_size(
            "read_buffer_bytes",
            self.read_buffer_bytes,
            u32::MAX as usize,
        )?;
        Ok(())
    }
}

impl Default for PollerConf {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_datagrams: default_max_datagrams(),
            read_buffer_bytes: default_read_buffer_bytes(),
        }
    }
}

fn check_size(name: &str, value: usize, max: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidConfig(format!("{name} must be positive")));
    }
    if value > max {
        return Err(Error::InvalidConfig(format!(
            "{name} = {value} exceeds the limit of {max}"
        )));
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SocketConf {
    pub bind: SocketAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Milliseconds passed to each wait; negative blocks until something fires.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,

    #[serde(default)]
    pub poller: PollerConf,

    #[serde(default)]
    pub socket: Vec<SocketConf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let config: Config = toml::from_str(&fs::read_to_string(path)?)?;
                config.poller.validate()?;
                Ok(config)
            }
            Some(ext) => Err(Error::InvalidConfig(format!(
                "unsupported config format: .{ext}"
            ))),
            None => Err(Error::InvalidConfig(format!(
                "config file {} has no extension",
                path.display()
            ))),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> i32 {
    -1
}

fn default_max_events() -> usize {
    64
}

fn default_max_datagrams() -> usize {
    32
}

fn default_read_buffer_bytes() -> usize {
    2048
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.timeout_ms, -1);
        assert_eq!(config.poller, PollerConf::default());
        assert!(config.socket.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"
            timeout_ms = 250

            [poller]
            max_events = 8
            max_datagrams = 4
            read_buffer_bytes = 1500

            [[socket]]
            bind = "127.0.0.1:9000"

            [[socket]]
            bind = "[::1]:9001"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.poller.max_events, 8);
        assert_eq!(config.poller.max_datagrams, 4);
        assert_eq!(config.poller.read_buffer_bytes, 1500);
        assert_eq!(config.socket.len(), 2);
        assert_eq!(config.socket[1].bind.port(), 9001);
    }

    #[test]
    fn test_partial_poller_section_uses_defaults() {
        let config: Config = toml::from_str("[poller]\nmax_events = 3\n").unwrap();
        assert_eq!(config.poller.max_events, 3);
        assert_eq!(config.poller.max_datagrams, 32);
        assert_eq!(config.poller.read_buffer_bytes, 2048);
    }

    #[test]
    fn test_validate_rejects_zero_and_oversize() {
        let mut conf = PollerConf::default();
        assert!(conf.validate().is_ok());

        conf.max_datagrams = 0;
        assert!(matches!(conf.validate(), Err(Error::InvalidConfig(_))));

        conf.max_datagrams = 1;
        conf.max_events = i32::MAX as usize + 1;
        assert!(matches!(conf.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "timeout_ms = 0\n[poller]\nmax_events = 2").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 0);
        assert_eq!(config.poller.max_events, 2);
    }

    #[test]
    fn test_load_rejects_invalid_poller() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[poller]\nread_buffer_bytes = 0").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_reports_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "timeout_ms = \"soon\"").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::ConfigParse(_))
        ));
    }
}
