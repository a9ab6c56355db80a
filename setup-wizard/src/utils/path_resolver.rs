use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const LOG_DIR_NAME: &str = "setup-logs";
const LOG_DIR_ENV: &str = "SETUP_WIZARD_LOG_DIR";
const APP_DIR_NAME: &str = "setup-wizard";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the folder where the binary is running from.
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Ok(cwd)
}

/// Resolve log folder (absolute path)
///
/// Order: `SETUP_WIZARD_LOG_DIR`, an existing `setup-logs/` in the working
/// directory or one of its ancestors, the per-user data directory, and
/// finally `setup-logs/` next to the binary.
pub fn resolve_log_folder() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return ensure_dir(PathBuf::from(dir));
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = find_existing_ancestor_dir(&cwd, LOG_DIR_NAME, 12) {
            return Ok(found);
        }
    }

    if let Some(data) = dirs::data_local_dir() {
        if let Ok(dir) = ensure_dir(data.join(APP_DIR_NAME).join("logs")) {
            return Ok(dir);
        }
    }

    let base = resolve_deployment_folder()?;
    ensure_dir(base.join(LOG_DIR_NAME))
}

/// Default directory holding persisted connection properties.
pub fn resolve_properties_dir() -> Result<PathBuf> {
    if let Some(config) = dirs::config_dir() {
        return Ok(config.join(APP_DIR_NAME));
    }
    Ok(resolve_deployment_folder()?.join("conf"))
}

/// Walk up from `start` looking for an existing `name/` directory.
pub fn find_existing_ancestor_dir(start: &Path, name: &str, max_depth: usize) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    for _ in 0..max_depth {
        let candidate = dir.join(name);
        if candidate.is_dir() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
    None
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create folder: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_log_dir_in_ancestor() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join(LOG_DIR_NAME)).unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_existing_ancestor_dir(&nested, LOG_DIR_NAME, 12).unwrap();
        assert_eq!(found, root.path().join(LOG_DIR_NAME));
    }

    #[test]
    fn stops_at_max_depth() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join(LOG_DIR_NAME)).unwrap();
        let nested = root.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).unwrap();

        assert!(find_existing_ancestor_dir(&nested, LOG_DIR_NAME, 2).is_none());
    }

    #[test]
    fn ensure_dir_creates_nested_folders() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("x").join("y");
        let dir = ensure_dir(target.clone()).unwrap();
        assert_eq!(dir, target);
        assert!(target.is_dir());
    }
}
