//! Source repository clones and directory aliases.
//!
//! Stage working directories are symlinked into the cloned tree so the clone
//! can be refreshed wholesale without disturbing local state files.
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Repo {
    pub url: String,
    pub refname: Option<String>,
    pub dest: PathBuf,
    pub link: Option<Link>,
}

/// Directory alias: `source` becomes a symlink pointing at `target`.
#[derive(Debug, Clone)]
pub struct Link {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl Repo {
    pub fn new(url: &str, dest: PathBuf) -> Self {
        Self {
            url: url.to_string(),
            refname: None,
            dest,
            link: None,
        }
    }

    pub fn set_ref(&mut self, tag: &str) {
        self.refname = Some(tag.to_string());
    }

    pub fn set_link(&mut self, source: PathBuf, target: PathBuf) {
        self.link = Some(Link { source, target });
    }

    /// Clone the repository at its pinned ref. Idempotent: an existing
    /// destination is left alone unless `force` requests a refresh.
    pub fn clone_repo(&self, force: bool) -> Result<()> {
        if self.dest.exists() {
            if !force {
                debug!(dest = %self.dest.display(), "clone already present, skipping");
                return Ok(());
            }
            fs::remove_dir_all(&self.dest)
                .with_context(|| format!("remove stale clone {}", self.dest.display()))?;
        }

        let git = which::which("git").context("git not found in PATH")?;
        let mut cmd = Command::new(git);
        cmd.args(["clone", "--depth", "1"]);
        if let Some(refname) = &self.refname {
            cmd.arg("--branch").arg(refname);
        }
        cmd.arg(&self.url).arg(&self.dest);
        debug!(url = %self.url, dest = %self.dest.display(), "cloning repository");
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .context("spawn git clone")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone {} failed: {}", self.url, stderr.trim());
        }
        Ok(())
    }

    /// (Re)establish the directory alias, replacing any stale link.
    pub fn link(&self) -> Result<()> {
        match &self.link {
            Some(link) => link.establish(),
            None => Ok(()),
        }
    }
}

impl Link {
    pub fn establish(&self) -> Result<()> {
        if self.source.symlink_metadata().is_ok() {
            fs::remove_file(&self.source)
                .with_context(|| format!("remove existing alias {}", self.source.display()))?;
        }
        std::os::unix::fs::symlink(&self.target, &self.source).with_context(|| {
            format!(
                "alias {} -> {}",
                self.source.display(),
                self.target.display()
            )
        })?;
        Ok(())
    }
}
