use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under $HOME holding the environment descriptor, clones, and
/// stage working directories.
pub const CONFIG_DIR_NAME: &str = ".landzone";

pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to locate home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Create `path` if it does not exist. Returns true when it was created.
pub fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path).with_context(|| format!("create {}", path.display()))?;
    Ok(true)
}

pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_reports_creation_once() {
        let root = tempfile::tempdir().expect("tempdir");
        let target = root.path().join("nested/config");
        assert!(ensure_dir(&target).expect("first create"));
        assert!(!ensure_dir(&target).expect("second create"));
        assert!(target.is_dir());
    }

    #[test]
    fn remove_dir_if_exists_is_idempotent() {
        let root = tempfile::tempdir().expect("tempdir");
        let target = root.path().join("scratch");
        fs::create_dir(&target).expect("create");
        remove_dir_if_exists(&target).expect("first remove");
        remove_dir_if_exists(&target).expect("second remove");
        assert!(!target.exists());
    }
}
