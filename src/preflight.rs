//! Preflight checks for required external binaries. Fatal before any stage
//! work begins.
use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};

const REQUIRED_BINARIES: [(&str, &str); 3] = [
    ("gcloud", "version"),
    ("terraform", "version"),
    ("git", "--version"),
];

pub fn check() -> Result<()> {
    for (name, probe) in REQUIRED_BINARIES {
        let path =
            which::which(name).with_context(|| format!("required binary {name} not found in PATH"))?;
        let status = Command::new(&path)
            .arg(probe)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("spawn {name} {probe}"))?;
        if !status.success() {
            bail!("{name} is installed but `{name} {probe}` exited with {status}");
        }
    }
    Ok(())
}
