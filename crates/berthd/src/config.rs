//! berth.toml configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BerthConfig {
    pub data_dir: PathBuf,
    pub agent: AgentConfig,
    pub placement: PlacementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Port every host agent listens on.
    pub port: u16,
    /// Per-call timeout: "250ms", "30s", "5m" or "1h". A bare number is seconds.
    pub timeout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlacementConfig {
    /// Zones used when a deploy names none.
    pub zones: Vec<String>,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/berth"),
            agent: AgentConfig::default(),
            placement: PlacementConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            timeout: "30s".to_string(),
        }
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: BerthConfig = toml::from_str(&content)?;
        config.agent_timeout()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn agent_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.agent.timeout)
            .with_context(|| format!("invalid agent timeout {:?}", self.agent.timeout))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("berth.redb")
    }
}

/// Digits followed by an optional `ms`, `s`, `m` or `h` unit.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: BerthConfig = toml::from_str("").unwrap();
        assert_eq!(config, BerthConfig::default());
        assert_eq!(config.agent_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parse_partial() {
        let toml_str = r#"
data_dir = "/tmp/berth"

[agent]
timeout = "500ms"

[placement]
zones = ["zone-a", "zone-b"]
"#;
        let config: BerthConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.port, 7070);
        assert_eq!(config.agent_timeout().unwrap(), Duration::from_millis(500));
        assert_eq!(config.placement.zones, vec!["zone-a", "zone-b"]);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/berth/berth.redb"));
    }

    #[test]
    fn timeout_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 30s "), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("3d"), None);
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn bad_timeout_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.toml");
        std::fs::write(&path, "[agent]\ntimeout = \"soon\"\n").unwrap();
        assert!(BerthConfig::from_file(&path).is_err());
    }
}
