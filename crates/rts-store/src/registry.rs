//! Project & Config Registry (C1): resolves a handshake to a project,
//! owns per-project on-disk paths and defaults, per spec section 4.1.

use std::path::{Path, PathBuf};

use rts_core::{current_env_map, interpolate_env, CollectorError, GlobalConfig, InfrastructureConfig, ProjectConfig, Result};
use tracing::{debug, info};

const MAX_APP_NAME_BYTES: usize = 100;

/// Replaces every byte outside `[a-z0-9._-]` with `_`, strips a leading
/// `.`, caps the result at 100 bytes, and falls back to `"default"` if
/// the result would be empty. Decided at the collector boundary per
/// `SPEC_FULL.md`'s open question 2 — the upstream source never made
/// this rule explicit.
pub fn sanitize_app_name(app_name: &str) -> String {
    let lowered = app_name.to_ascii_lowercase();
    let mut sanitized: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    while sanitized.starts_with('.') {
        sanitized.remove(0);
    }

    if sanitized.len() > MAX_APP_NAME_BYTES {
        sanitized.truncate(MAX_APP_NAME_BYTES);
    }

    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

/// Owns the root directory layout and lazily-created per-project
/// subdirectories.
pub struct Registry {
    root_dir: PathBuf,
}

impl Registry {
    /// `root_dir` defaults to a per-user data directory; callers may
    /// override it (tests, custom deployments) at construction.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self { root_dir: root_dir.into() }
    }

    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("runtimescope")
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root_dir.join("projects")
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_dir().join(project)
    }

    pub fn project_config_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("config.json")
    }

    pub fn project_events_db_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("events.db")
    }

    pub fn project_sessions_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("sessions")
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.root_dir.join("config.json")
    }

    pub fn project_infrastructure_json_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("infrastructure.json")
    }

    pub fn project_infrastructure_yaml_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("infrastructure.yaml")
    }

    /// Creates the root directory and seeds `config.json` with
    /// [`GlobalConfig::default`] if absent. Idempotent.
    pub async fn ensure_global_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await?;

        let path = self.global_config_path();
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        let config = GlobalConfig::default();
        let contents = serde_json::to_vec_pretty(&config)?;
        tokio::fs::write(&path, contents).await?;
        info!(path = %path.display(), "seeded global config");
        Ok(())
    }

    /// Creates `projects/<name>/` and `projects/<name>/sessions/`, and
    /// seeds `config.json` with [`ProjectConfig::new`] if absent.
    /// Idempotent: running it twice yields the same on-disk state.
    pub async fn ensure_project_dir(&self, project: &str, created_at: i64) -> Result<()> {
        let dir = self.project_dir(project);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(self.project_sessions_dir(project)).await?;

        let config_path = self.project_config_path(project);
        if tokio::fs::try_exists(&config_path).await? {
            return Ok(());
        }

        let config = ProjectConfig::new(project, created_at);
        let contents = serde_json::to_vec_pretty(&config)?;
        tokio::fs::write(&config_path, contents).await?;
        debug!(project, "seeded project config");
        Ok(())
    }

    /// Resolves a handshake's `app_name` to a project name. The core
    /// does not distinguish "declared project" from "app name" in the
    /// wire protocol (spec section 3.1: project is derived from
    /// `app_name` unless a different project is declared, and no
    /// handshake field for an explicit project override exists in
    /// section 6.1) — so resolution is sanitization alone.
    pub fn resolve_project(&self, app_name: &str) -> String {
        sanitize_app_name(app_name)
    }

    /// Lists directory names under `projects/`, without regard to
    /// whether a session is currently connected for that project.
    pub async fn list_projects(&self) -> Result<Vec<String>> {
        let dir = self.projects_dir();
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn load_project_config(&self, project: &str) -> Result<ProjectConfig> {
        let path = self.project_config_path(project);
        let contents = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CollectorError::not_found(format!("project config: {project}"))
            } else {
                CollectorError::from(e)
            }
        })?;
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Loads `infrastructure.json` or `infrastructure.yaml` for `project`,
    /// whichever exists (json preferred), with `${VAR}` references
    /// expanded against the process environment per spec section 9.
    /// Returns `None` when neither file is present — the file is
    /// optional, operator-supplied metadata.
    pub async fn load_infrastructure_config(
        &self,
        project: &str,
    ) -> Result<Option<InfrastructureConfig>> {
        let json_path = self.project_infrastructure_json_path(project);
        if tokio::fs::try_exists(&json_path).await? {
            let contents = tokio::fs::read_to_string(&json_path).await?;
            let raw: serde_json::Value = serde_json::from_str(&contents)?;
            let resolved = interpolate_env(&raw, &current_env_map());
            return Ok(Some(serde_json::from_value(resolved)?));
        }

        let yaml_path = self.project_infrastructure_yaml_path(project);
        if tokio::fs::try_exists(&yaml_path).await? {
            let contents = tokio::fs::read_to_string(&yaml_path).await?;
            let raw: serde_json::Value = serde_yaml::from_str(&contents)
                .map_err(|e| CollectorError::storage(format!("infrastructure.yaml: {e}")))?;
            let resolved = interpolate_env(&raw, &current_env_map());
            return Ok(Some(serde_json::from_value(resolved)?));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_lowercase_and_symbols() {
        assert_eq!(sanitize_app_name("My App!"), "my_app_");
    }

    #[test]
    fn strips_leading_dots() {
        assert_eq!(sanitize_app_name("..hidden"), "hidden");
    }

    #[test]
    fn caps_length_at_100_bytes() {
        let long = "a".repeat(150);
        assert_eq!(sanitize_app_name(&long).len(), 100);
    }

    #[test]
    fn empty_result_becomes_default() {
        assert_eq!(sanitize_app_name("..."), "default");
        assert_eq!(sanitize_app_name(""), "default");
    }

    #[test]
    fn leaves_safe_names_untouched() {
        assert_eq!(sanitize_app_name("my-app_v2.1"), "my-app_v2.1");
    }

    #[tokio::test]
    async fn ensure_project_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::new(tmp.path());
        registry.ensure_global_dir().await.unwrap();
        registry.ensure_project_dir("demo", 1000).await.unwrap();
        let config_before = tokio::fs::read(registry.project_config_path("demo")).await.unwrap();

        registry.ensure_project_dir("demo", 2000).await.unwrap();
        let config_after = tokio::fs::read(registry.project_config_path("demo")).await.unwrap();

        assert_eq!(config_before, config_after);
        assert!(registry.project_sessions_dir("demo").exists());
    }

    #[tokio::test]
    async fn list_projects_returns_directory_names() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::new(tmp.path());
        registry.ensure_project_dir("alpha", 1000).await.unwrap();
        registry.ensure_project_dir("beta", 1000).await.unwrap();

        let mut names = registry.list_projects().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn infrastructure_config_is_none_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::new(tmp.path());
        registry.ensure_project_dir("demo", 1000).await.unwrap();

        let config = registry.load_infrastructure_config("demo").await.unwrap();
        assert!(config.is_none());
    }

    #[tokio::test]
    async fn infrastructure_config_interpolates_env_vars() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::new(tmp.path());
        registry.ensure_project_dir("demo", 1000).await.unwrap();

        std::env::set_var("RTS_TEST_DB_HOST", "db.internal");
        tokio::fs::write(
            registry.project_infrastructure_json_path("demo"),
            r#"{"project":"demo","databases":[{"name":"${RTS_TEST_DB_HOST}"}]}"#,
        )
        .await
        .unwrap();

        let config = registry.load_infrastructure_config("demo").await.unwrap().unwrap();
        assert_eq!(config.databases[0]["name"], "db.internal");
        std::env::remove_var("RTS_TEST_DB_HOST");
    }
}
