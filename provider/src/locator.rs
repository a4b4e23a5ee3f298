//! Platform server locators.
//!
//! On Windows installed instances are read from the registry with
//! `reg query`, across both the 64-bit and the 32-bit view. Elsewhere they
//! come from a JSON instance file:
//!
//! ```json
//! { "instances": [ { "instance": "MSSQLSERVER" }, { "instance": "main", "port": 5433 } ] }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use common::config::AppConfig;
use common::models::Dialect;
use common::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// An installed server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl InstanceEntry {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            port: None,
        }
    }
}

/// Enumerates locally installed server instances.
#[async_trait]
pub trait PlatformServerLocator: Send + Sync {
    async fn installed_instances(&self) -> AppResult<Vec<InstanceEntry>>;
}

/// Registry views searched by [`RegistryLocator`].
const REGISTRY_VIEWS: [&str; 2] = ["/reg:64", "/reg:32"];

/// Reads instance names from the Windows registry.
pub struct RegistryLocator {
    key: &'static str,
}

impl RegistryLocator {
    /// Locator for `dialect`, if the dialect registers its instances.
    pub fn for_dialect(dialect: Dialect) -> Option<Self> {
        let key = match dialect {
            Dialect::SqlServer => r"HKLM\SOFTWARE\Microsoft\Microsoft SQL Server\Instance Names\SQL",
            Dialect::Postgres => r"HKLM\SOFTWARE\PostgreSQL\Services",
            Dialect::MySql => r"HKLM\SOFTWARE\MySQL AB",
            Dialect::Sqlite => return None,
        };
        Some(Self { key })
    }

    /// Parses `reg query` output.
    ///
    /// Value lines (`NAME    REG_SZ    DATA`) yield the value name; subkey
    /// lines yield the last path segment.
    pub fn parse_output(key: &str, output: &str) -> Vec<InstanceEntry> {
        let queried = key.rsplit('\\').next().unwrap_or(key);
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                if line.starts_with("HKEY_") {
                    let segment = line.rsplit('\\').next()?;
                    (!segment.eq_ignore_ascii_case(queried)).then(|| segment.to_string())
                } else if line.contains("REG_") {
                    line.split_whitespace().next().map(str::to_string)
                } else {
                    None
                }
            })
            .map(InstanceEntry::new)
            .collect()
    }
}

#[async_trait]
impl PlatformServerLocator for RegistryLocator {
    async fn installed_instances(&self) -> AppResult<Vec<InstanceEntry>> {
        let mut entries = Vec::new();
        for view in REGISTRY_VIEWS {
            let output = tokio::process::Command::new("reg")
                .args(["query", self.key, view])
                .output()
                .await
                .map_err(|e| AppError::Configuration(format!("reg query failed: {}", e)))?;

            if !output.status.success() {
                tracing::debug!(key = self.key, view, "Registry key not present in view");
                continue;
            }
            let text = String::from_utf8_lossy(&output.stdout);
            entries.extend(Self::parse_output(self.key, &text));
        }
        Ok(entries)
    }
}

#[derive(Debug, Deserialize)]
struct InstanceFile {
    #[serde(default)]
    instances: Vec<InstanceEntry>,
}

/// Reads instances from a JSON file. A missing file lists nothing.
pub struct ConfigFileLocator {
    path: PathBuf,
}

impl ConfigFileLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PlatformServerLocator for ConfigFileLocator {
    async fn installed_instances(&self) -> AppResult<Vec<InstanceEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No instance file");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::Configuration(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let file: InstanceFile = serde_json::from_str(&content).map_err(|e| {
            AppError::Configuration(format!("invalid instance file {}: {}", self.path.display(), e))
        })?;
        Ok(file.instances)
    }
}

/// Locator for the current platform.
pub fn platform_locator(config: &AppConfig) -> Arc<dyn PlatformServerLocator> {
    if cfg!(windows) {
        if let Some(registry) = RegistryLocator::for_dialect(config.dialect) {
            return Arc::new(registry);
        }
    }
    Arc::new(ConfigFileLocator::new(config.instances_file.clone()))
}

/// Name of this machine, or `localhost` when it cannot be determined.
pub fn machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .chain(std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Builds probe candidates from installed instances.
///
/// The default instance (or every instance, for dialects without named
/// instances) maps to the bare machine name; others to `machine\instance`.
/// A known port is appended as `,port`. Duplicates are dropped
/// case-insensitively, keeping the first.
pub fn candidate_names(machine: &str, dialect: Dialect, entries: &[InstanceEntry]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for entry in entries {
        let instance = entry.instance.trim();
        if instance.is_empty() {
            continue;
        }
        let mut name = match dialect.default_instance_name() {
            Some(default) if !instance.eq_ignore_ascii_case(default) => format!("{}\\{}", machine, instance),
            _ => machine.to_string(),
        };
        if let Some(port) = entry.port {
            name = format!("{},{}", name, port);
        }
        if !candidates.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            candidates.push(name);
        }
    }
    candidates
}

/// Fixed fallback list, probed in order until one connects.
pub fn fallback_candidates(machine: &str, dialect: Dialect) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(instance) = dialect.fallback_instance_name() {
        candidates.push(format!(".\\{}", instance));
    }
    candidates.extend(["localhost", ".", "127.0.0.1"].map(String::from));
    if !candidates.iter().any(|c| c.eq_ignore_ascii_case(machine)) {
        candidates.push(machine.to_string());
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_lines() {
        let output = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Microsoft SQL Server\\Instance Names\\SQL\r\n    MSSQLSERVER    REG_SZ    MSSQL15.MSSQLSERVER\r\n    SQLEXPRESS    REG_SZ    MSSQL15.SQLEXPRESS\r\n\r\n";
        let entries = RegistryLocator::parse_output(
            r"HKLM\SOFTWARE\Microsoft\Microsoft SQL Server\Instance Names\SQL",
            output,
        );
        assert_eq!(entries, vec![InstanceEntry::new("MSSQLSERVER"), InstanceEntry::new("SQLEXPRESS")]);
    }

    #[test]
    fn test_parse_subkey_lines() {
        let output = "HKEY_LOCAL_MACHINE\\SOFTWARE\\PostgreSQL\\Services\\postgresql-x64-16\n";
        let entries = RegistryLocator::parse_output(r"HKLM\SOFTWARE\PostgreSQL\Services", output);
        assert_eq!(entries, vec![InstanceEntry::new("postgresql-x64-16")]);
    }

    #[test]
    fn test_candidates_default_and_named() {
        let entries = vec![
            InstanceEntry::new("MSSQLSERVER"),
            InstanceEntry::new("SQLEXPRESS"),
            InstanceEntry::new("sqlexpress"),
            InstanceEntry { instance: "REPORTING".into(), port: Some(1500) },
        ];
        let candidates = candidate_names("HOST1", Dialect::SqlServer, &entries);
        assert_eq!(candidates, vec!["HOST1", "HOST1\\SQLEXPRESS", "HOST1\\REPORTING,1500"]);
    }

    #[test]
    fn test_candidates_without_named_instances() {
        let entries = vec![
            InstanceEntry::new("main"),
            InstanceEntry { instance: "replica".into(), port: Some(5433) },
            InstanceEntry::new("other"),
        ];
        let candidates = candidate_names("host1", Dialect::Postgres, &entries);
        assert_eq!(candidates, vec!["host1", "host1,5433"]);
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(
            fallback_candidates("HOST1", Dialect::SqlServer),
            vec![".\\SQLEXPRESS", "localhost", ".", "127.0.0.1", "HOST1"]
        );
        assert_eq!(
            fallback_candidates("localhost", Dialect::Postgres),
            vec!["localhost", ".", "127.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_config_file_locator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let locator = ConfigFileLocator::new(&path);
        assert!(locator.installed_instances().await.unwrap().is_empty());

        tokio::fs::write(&path, r#"{"instances":[{"instance":"main"},{"instance":"replica","port":5433}]}"#)
            .await
            .unwrap();
        let entries = locator.installed_instances().await.unwrap();
        assert_eq!(entries[1], InstanceEntry { instance: "replica".into(), port: Some(5433) });

        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            locator.installed_instances().await,
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_machine_name_is_never_blank() {
        assert!(!machine_name().is_empty());
    }
}
