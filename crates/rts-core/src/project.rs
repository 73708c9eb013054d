//! Project identity and config, per spec sections 3.1, 4.1 and 6.3.

use serde::{Deserialize, Serialize};

/// A logical grouping of sessions under one sanitized `app_name`.
///
/// The project struct itself carries only identity and config; the
/// durable log, session table and snapshot history it owns live in
/// `rts-store` and `rts-session`, keyed by `Project::name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub config: ProjectConfig,
}

impl Project {
    pub fn new(name: impl Into<String>, created_at: i64) -> Self {
        let name = name.into();
        Self {
            config: ProjectConfig::new(name.clone(), created_at),
            name,
        }
    }
}

/// `<root>/projects/<name>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub name: String,
    pub created_at: i64,
    #[serde(default)]
    pub sdk_version: Option<String>,
    #[serde(default)]
    pub settings: ProjectSettings,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, created_at: i64) -> Self {
        Self {
            name: name.into(),
            created_at,
            sdk_version: None,
            settings: ProjectSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default)]
    pub buffer_size: Option<u32>,
    /// Operator-set snapshot retention window. See `SPEC_FULL.md`'s open
    /// question decision: defaults to 30 when absent.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self { buffer_size: None, retention_days: None }
    }
}

impl ProjectSettings {
    pub const DEFAULT_RETENTION_DAYS: u32 = 30;

    pub fn retention_days(&self) -> u32 {
        self.retention_days.unwrap_or(Self::DEFAULT_RETENTION_DAYS)
    }
}

/// `<root>/config.json`, the process-wide default config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub default_port: u16,
    pub buffer_size: u32,
    pub http_port: u16,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { default_port: 9090, buffer_size: 10_000, http_port: 9091 }
    }
}

/// `<root>/projects/<name>/infrastructure.{json,yaml}`. Optional; every
/// field is operator-supplied metadata with no core semantics attached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub databases: Vec<serde_json::Value>,
    #[serde(default)]
    pub deployments: Vec<serde_json::Value>,
    #[serde(default)]
    pub services: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_days_defaults_to_thirty() {
        let settings = ProjectSettings::default();
        assert_eq!(settings.retention_days(), 30);
    }

    #[test]
    fn retention_days_honors_override() {
        let settings = ProjectSettings { buffer_size: None, retention_days: Some(7) };
        assert_eq!(settings.retention_days(), 7);
    }

    #[test]
    fn global_config_defaults_match_spec() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.default_port, 9090);
        assert_eq!(cfg.buffer_size, 10_000);
        assert_eq!(cfg.http_port, 9091);
    }
}
