use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::discovery::DiscoveryConfig;
use crate::protocol::{discovery, timeouts, DEFAULT_PORT};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub last_address: Option<String>, // remembered appliance address
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub discovery_port: u16,
    pub interface: Option<String>, // e.g. "en0"; first usable when unset
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            last_address: None,
            port: DEFAULT_PORT,
            connect_timeout_ms: timeouts::CONNECT_MS,
            discovery_timeout_ms: timeouts::DISCOVERY_MS,
            discovery_port: discovery::PORT,
            interface: None,
        }
    }
}

impl ClientConfig {
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.discovery_port,
            timeout_ms: self.discovery_timeout_ms,
            interface: self.interface.clone(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("digiframe");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("digiframe");
    }
    PathBuf::from(".")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("framectl.toml")
}

pub fn load_config(path: &Path) -> Result<ClientConfig> {
    if let Ok(data) = std::fs::read_to_string(path) {
        let cfg: ClientConfig = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(cfg)
    } else {
        Ok(ClientConfig::default())
    }
}

pub fn save_config(path: &Path, cfg: &ClientConfig) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).ok();
    let data = toml::to_string(cfg)?;
    // atomic write
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    use std::io::Write as _;
    tmp.write_all(data.as_bytes())?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600));
    }
    tmp.persist(path)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}
