use super::DEFAULT_CONNECTION;
use crate::core::{Result, UpgradeError};
use crate::graph::PathPolicyKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

/// Settings for one SQLite connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConnectionConfig {
    /// Database file
    pub path: PathBuf,

    /// How long to wait on a locked database
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

impl SqliteConnectionConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: None,
        }
    }

    /// Set the busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn busy_timeout_duration(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }
}

/// Upgrade run configuration, usually read from a TOML file:
///
/// ```toml
/// definition = "upgrade.json"
/// target = "2.*"
/// path_policy = "fewest-switches"
///
/// [connections.default]
/// path = "app.db"
/// busy_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgradeConfig {
    /// Upgrade definition file
    pub definition: PathBuf,

    /// Default target: a version, a `prefix*`, or `latest`
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub allow_downgrade: bool,

    #[serde(default)]
    pub path_policy: PathPolicyKind,

    /// Create the control tables when the definition has no setup segments
    #[serde(default = "default_true")]
    pub auto_create_control_tables: bool,

    #[serde(default)]
    pub connections: BTreeMap<String, SqliteConnectionConfig>,
}

impl UpgradeConfig {
    /// Create a configuration with a single default connection
    pub fn new(definition: impl Into<PathBuf>, database: impl Into<PathBuf>) -> Self {
        let mut connections = BTreeMap::new();
        connections.insert(
            DEFAULT_CONNECTION.to_string(),
            SqliteConnectionConfig::new(database),
        );
        Self {
            definition: definition.into(),
            target: None,
            allow_downgrade: false,
            path_policy: PathPolicyKind::default(),
            auto_create_control_tables: true,
            connections,
        }
    }

    /// Set the target
    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    /// Allow downgrade segments
    pub fn allow_downgrade(mut self, allow: bool) -> Self {
        self.allow_downgrade = allow;
        self
    }

    /// Set the path policy
    pub fn path_policy(mut self, policy: PathPolicyKind) -> Self {
        self.path_policy = policy;
        self
    }

    /// Set control table auto-creation
    pub fn auto_create_control_tables(mut self, enabled: bool) -> Self {
        self.auto_create_control_tables = enabled;
        self
    }

    /// Add a named connection
    pub fn connection(mut self, name: &str, config: SqliteConnectionConfig) -> Self {
        self.connections.insert(name.to_lowercase(), config);
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.connections = std::mem::take(&mut config.connections)
            .into_iter()
            .map(|(name, conn)| (name.to_lowercase(), conn))
            .collect();
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. Relative paths inside are resolved against the
    /// directory of the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            UpgradeError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        Ok(match path.parent() {
            Some(base) => config.relative_to(base),
            None => config,
        })
    }

    fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        self.definition = resolve(&self.definition);
        for conn in self.connections.values_mut() {
            conn.path = resolve(&conn.path);
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.definition.as_os_str().is_empty() {
            return Err(UpgradeError::Config("definition path cannot be empty".into()));
        }
        if !self.connections.contains_key(DEFAULT_CONNECTION) {
            return Err(UpgradeError::Config(format!(
                "a '{}' connection is required",
                DEFAULT_CONNECTION
            )));
        }
        if let Some((name, _)) = self
            .connections
            .iter()
            .find(|(_, c)| c.path.as_os_str().is_empty())
        {
            return Err(UpgradeError::Config(format!(
                "connection '{}' has an empty path",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = UpgradeConfig::from_toml_str(
            r#"
            definition = "upgrade.json"
            target = "2.*"
            allow_downgrade = true
            path_policy = "fewest-switches"

            [connections.default]
            path = "app.db"
            busy_timeout_ms = 250

            [connections.Audit]
            path = "audit.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.as_deref(), Some("2.*"));
        assert!(config.allow_downgrade);
        assert!(config.auto_create_control_tables);
        assert_eq!(config.path_policy, PathPolicyKind::FewestSwitches);
        assert!(config.connections.contains_key("audit"));
        assert_eq!(
            config.connections["default"].busy_timeout_duration(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_default_connection_required() {
        let result = UpgradeConfig::from_toml_str(
            r#"
            definition = "upgrade.json"
            [connections.other]
            path = "other.db"
            "#,
        );
        assert!(matches!(result, Err(UpgradeError::Config(msg)) if msg.contains("default")));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = UpgradeConfig::from_toml_str("definition = \"a.json\"\nbogus = 1\n");
        assert!(matches!(result, Err(UpgradeError::Config(_))));
    }

    #[test]
    fn test_builder_and_relative_paths() {
        let config = UpgradeConfig::new("upgrade.json", "app.db")
            .target("latest")
            .path_policy(PathPolicyKind::FewestSwitches)
            .connection("audit", SqliteConnectionConfig::new("/var/audit.db"))
            .relative_to(Path::new("/etc/app"));

        assert!(config.validate().is_ok());
        assert_eq!(config.definition, PathBuf::from("/etc/app/upgrade.json"));
        assert_eq!(config.connections["default"].path, PathBuf::from("/etc/app/app.db"));
        assert_eq!(config.connections["audit"].path, PathBuf::from("/var/audit.db"));
    }
}
