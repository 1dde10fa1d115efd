//! Path Resolver (spec §4.1).
//!
//! Every function takes the working directory as an explicit parameter
//! rather than reading the process-wide cwd, so the whole crate can be
//! pointed at a `tempfile::TempDir` in tests without racing on
//! `std::env::set_current_dir`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const SUREK_DATA_DIR: &str = "surek-data";
pub const PROJECTS_DIR: &str = "projects";
pub const VOLUMES_DIR: &str = "volumes";
pub const STACKS_DIR: &str = "stacks";
pub const COMMIT_CACHE_FILE: &str = "github_cache.json";
pub const BACKUP_FAILURES_FILE: &str = "backup_failures.json";
pub const PATCHED_COMPOSE_FILE: &str = "docker-compose.surek.yml";
pub const STACK_CONFIG_FILE: &str = "surek.stack.yml";

/// `<cwd>/surek-data`. Created lazily on first access.
pub fn data_dir(cwd: &Path) -> Result<PathBuf> {
    ensure_dir(cwd.join(SUREK_DATA_DIR))
}

/// `<cwd>/surek-data/projects`.
pub fn projects_dir(cwd: &Path) -> Result<PathBuf> {
    ensure_dir(data_dir(cwd)?.join(PROJECTS_DIR))
}

/// `<cwd>/surek-data/projects/<stack>`.
pub fn project_dir(cwd: &Path, stack_name: &str) -> Result<PathBuf> {
    Ok(projects_dir(cwd)?.join(stack_name))
}

/// `<cwd>/surek-data/volumes`.
pub fn volumes_dir(cwd: &Path) -> Result<PathBuf> {
    ensure_dir(data_dir(cwd)?.join(VOLUMES_DIR))
}

/// `<cwd>/surek-data/volumes/<stack>/<volume>`.
pub fn volume_dir(cwd: &Path, stack_name: &str, volume_name: &str) -> Result<PathBuf> {
    Ok(volumes_dir(cwd)?.join(stack_name).join(volume_name))
}

/// `<cwd>/stacks`. Not created eagerly — its absence is a `StacksError`.
pub fn stacks_dir(cwd: &Path) -> PathBuf {
    cwd.join(STACKS_DIR)
}

/// Directory containing the bundled system-stack assets. Read-only; the tool
/// never writes here. Resolved next to the running executable so packaged
/// installs keep working regardless of the caller's cwd.
pub fn system_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .map(|dir| dir.join("system"))
        .unwrap_or_else(|| PathBuf::from("system"))
}

pub fn commit_cache_path(cwd: &Path) -> Result<PathBuf> {
    Ok(data_dir(cwd)?.join(COMMIT_CACHE_FILE))
}

pub fn backup_failures_path(cwd: &Path) -> Result<PathBuf> {
    Ok(data_dir(cwd)?.join(BACKUP_FAILURES_FILE))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    if !path.exists() {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create directory {}", path.display()))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_created_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let expected = tmp.path().join("surek-data");
        assert!(!expected.exists());
        let got = data_dir(tmp.path()).unwrap();
        assert_eq!(got, expected);
        assert!(expected.is_dir());
    }

    #[test]
    fn project_dir_does_not_create_eagerly() {
        let tmp = tempfile::tempdir().unwrap();
        let p = project_dir(tmp.path(), "demo").unwrap();
        assert_eq!(p, tmp.path().join("surek-data/projects/demo"));
        assert!(!p.exists());
    }

    #[test]
    fn stacks_dir_not_created() {
        let tmp = tempfile::tempdir().unwrap();
        let p = stacks_dir(tmp.path());
        assert!(!p.exists());
    }
}
