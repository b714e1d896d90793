//! Object storage adapter over the gcloud CLI.
//!
//! Remote artifacts (the descriptor, stage var files, provider files) live in
//! one bucket derived from the environment prefix; see `vars::bucket_name`.
use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

/// Uploads are bounded; a hung network call should not wedge the pipeline
/// right after a successful apply.
pub const UPLOAD_DEADLINE: Duration = Duration::from_secs(50);

pub trait ObjectStore {
    fn upload(&self, bucket: &str, object: &str, local: &Path) -> Result<()>;
    fn download(&self, bucket: &str, local: &Path, object: &str) -> Result<()>;
    fn exists(&self, bucket: &str, object: &str) -> Result<bool>;
}

pub struct GcloudStorage {
    binary: PathBuf,
}

impl GcloudStorage {
    pub fn locate() -> Result<Self> {
        let binary = which::which("gcloud").context("gcloud not found in PATH")?;
        Ok(Self { binary })
    }

    fn object_url(bucket: &str, object: &str) -> String {
        format!("gs://{bucket}/{object}")
    }
}

impl ObjectStore for GcloudStorage {
    fn upload(&self, bucket: &str, object: &str, local: &Path) -> Result<()> {
        let url = Self::object_url(bucket, object);
        debug!(%url, local = %local.display(), "uploading object");
        let mut cmd = Command::new(&self.binary);
        cmd.args(["storage", "cp"]).arg(local).arg(&url);
        run_with_deadline(cmd, UPLOAD_DEADLINE)
            .with_context(|| format!("upload {} to {url}", local.display()))
    }

    fn download(&self, bucket: &str, local: &Path, object: &str) -> Result<()> {
        let url = Self::object_url(bucket, object);
        debug!(%url, local = %local.display(), "downloading object");
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let output = Command::new(&self.binary)
            .args(["storage", "cp"])
            .arg(&url)
            .arg(local)
            .output()
            .context("spawn gcloud storage cp")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "download {url} to {} failed: {}",
                local.display(),
                stderr.trim()
            );
        }
        Ok(())
    }

    fn exists(&self, bucket: &str, object: &str) -> Result<bool> {
        let url = Self::object_url(bucket, object);
        let output = Command::new(&self.binary)
            .args(["storage", "objects", "describe"])
            .arg(&url)
            .output()
            .context("spawn gcloud storage objects describe")?;
        Ok(output.status.success())
    }
}

/// Run a subprocess to completion, killing it when the deadline passes.
fn run_with_deadline(mut cmd: Command, deadline: Duration) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn gcloud storage")?;
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("poll gcloud storage")? {
            if status.success() {
                return Ok(());
            }
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            bail!("gcloud storage exited with {status}: {}", stderr.trim());
        }
        if start.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!(
                "gcloud storage call exceeded the {}s deadline",
                deadline.as_secs()
            );
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_kills_a_hung_subprocess() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let start = Instant::now();
        let err = run_with_deadline(cmd, Duration::from_millis(300)).expect_err("deadline");
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("deadline"), "{err}");
    }

    #[test]
    fn failing_subprocess_surfaces_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        let err = run_with_deadline(cmd, Duration::from_secs(5)).expect_err("nonzero exit");
        assert!(err.to_string().contains("boom"), "{err}");
    }

    #[test]
    fn object_urls_join_bucket_and_key() {
        assert_eq!(
            GcloudStorage::object_url("demo1-prod-iac-core-outputs-0", "tfvars/x.json"),
            "gs://demo1-prod-iac-core-outputs-0/tfvars/x.json"
        );
    }
}
