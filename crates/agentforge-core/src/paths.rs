//! Filesystem layout, resolved once at startup and passed down.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable that relocates the AgentForge home directory.
pub const HOME_ENV: &str = "AGENTFORGE_HOME";

/// Resolved AgentForge paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgePaths {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub task_db: PathBuf,
    pub log_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl ForgePaths {
    /// Build the layout rooted at `home`.
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let data_dir = home.join("data");
        Self {
            config_file: home.join("config.toml"),
            task_db: data_dir.join("tasks.db"),
            data_dir,
            log_dir: home.join("logs"),
            reports_dir: home.join("reports"),
            home,
        }
    }

    /// Resolve from an explicit home, else `$AGENTFORGE_HOME`, else `~/.agentforge`.
    pub fn resolve(explicit_home: Option<&Path>) -> Self {
        let env_home = std::env::var_os(HOME_ENV).map(PathBuf::from);
        Self::resolve_with(explicit_home, env_home)
    }

    fn resolve_with(explicit_home: Option<&Path>, env_home: Option<PathBuf>) -> Self {
        if let Some(home) = explicit_home {
            return Self::from_home(home);
        }
        if let Some(home) = env_home.filter(|p| !p.as_os_str().is_empty()) {
            return Self::from_home(home);
        }
        Self::from_home(Self::default_home())
    }

    /// `~/.agentforge`, or `./.agentforge` when no home directory is known.
    pub fn default_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentforge")
    }

    /// Create the home, data, log and report directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.home, &self.data_dir, &self.log_dir, &self.reports_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_home() {
        let paths = ForgePaths::from_home("/tmp/forge");
        assert_eq!(paths.config_file, PathBuf::from("/tmp/forge/config.toml"));
        assert_eq!(paths.task_db, PathBuf::from("/tmp/forge/data/tasks.db"));
        assert_eq!(paths.log_dir, PathBuf::from("/tmp/forge/logs"));
    }

    #[test]
    fn test_explicit_home_wins_over_env() {
        let paths = ForgePaths::resolve_with(
            Some(Path::new("/explicit")),
            Some(PathBuf::from("/from-env")),
        );
        assert_eq!(paths.home, PathBuf::from("/explicit"));
    }

    #[test]
    fn test_env_home_used_when_not_empty() {
        let paths = ForgePaths::resolve_with(None, Some(PathBuf::from("/from-env")));
        assert_eq!(paths.home, PathBuf::from("/from-env"));

        let fallback = ForgePaths::resolve_with(None, Some(PathBuf::new()));
        assert!(fallback.home.ends_with(".agentforge"));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ForgePaths::from_home(dir.path().join("home"));
        paths.ensure_dirs().unwrap();
        assert!(paths.data_dir.is_dir());
        assert!(paths.log_dir.is_dir());
        assert!(paths.reports_dir.is_dir());
    }
}
