//! Narrow adapter over the IaC engine's CLI.
//!
//! Every operation is a blocking subprocess call; a non-zero exit becomes a
//! structured error carrying the working directory and the captured stderr.
use anyhow::{anyhow, bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One `key=value` variable assignment passed on the engine command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub key: String,
    pub value: String,
}

impl Var {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn assignment(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

#[derive(Debug, Default)]
pub struct PlanOutput {
    /// Human-readable rendering of the plan file.
    pub rendered: String,
}

/// Engine operations consumed by stages and the orchestrator. Implemented by
/// [`Terraform`] in production and by recording fakes in pipeline tests.
pub trait Engine {
    fn init(&self, dir: &Path, migrate: bool, verbose: bool) -> Result<()>;
    fn plan(
        &self,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[Var],
        verbose: bool,
    ) -> Result<PlanOutput>;
    fn apply(
        &self,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[Var],
        targets: &[String],
        verbose: bool,
    ) -> Result<()>;
    fn destroy(
        &self,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[Var],
        targets: &[String],
        verbose: bool,
    ) -> Result<()>;
    fn output(&self, dir: &Path, key: &str) -> Result<String>;
    fn state_pull(&self, dir: &Path) -> Result<String>;
}

pub struct Terraform {
    binary: PathBuf,
}

impl Terraform {
    pub fn locate() -> Result<Self> {
        let binary = which::which("terraform").context("terraform not found in PATH")?;
        Ok(Self { binary })
    }

    /// Run the engine in `dir`. Verbose streams child output to the terminal;
    /// otherwise output is captured and stderr is folded into any error.
    fn run(&self, dir: &Path, args: &[OsString], verbose: bool) -> Result<()> {
        debug!(dir = %dir.display(), ?args, "invoking terraform");
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(dir).args(args);
        if verbose {
            let status = cmd.status().context("spawn terraform")?;
            if !status.success() {
                bail!("terraform {:?} in {} exited with {status}", args[0], dir.display());
            }
            return Ok(());
        }
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .context("spawn terraform")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "terraform {:?} in {} exited with {}: {}",
                args[0],
                dir.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    /// Run the engine and return its stdout. Always captured, even in
    /// verbose runs, because callers parse the result.
    fn run_capture(&self, dir: &Path, args: &[&str]) -> Result<String> {
        debug!(dir = %dir.display(), ?args, "invoking terraform");
        let output = Command::new(&self.binary)
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .context("spawn terraform")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "terraform {:?} in {} exited with {}: {}",
                args[0],
                dir.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn push_var_args(args: &mut Vec<OsString>, var_files: &[PathBuf], vars: &[Var]) {
    for file in var_files {
        let mut arg = OsString::from("-var-file=");
        arg.push(file);
        args.push(arg);
    }
    for var in vars {
        args.push("-var".into());
        args.push(var.assignment().into());
    }
}

fn push_target_args(args: &mut Vec<OsString>, targets: &[String]) {
    for target in targets {
        args.push(format!("-target={target}").into());
    }
}

impl Engine for Terraform {
    fn init(&self, dir: &Path, migrate: bool, verbose: bool) -> Result<()> {
        let mut args: Vec<OsString> = vec!["init".into(), "-input=false".into()];
        if migrate {
            // Copy state between local and remote backends without prompting.
            args.push("-migrate-state".into());
            args.push("-force-copy".into());
        }
        self.run(dir, &args, verbose)
    }

    fn plan(
        &self,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[Var],
        verbose: bool,
    ) -> Result<PlanOutput> {
        // Scratch dir inside the stage so relative module paths resolve;
        // dropped (and cleaned) as soon as the plan has been rendered.
        let scratch = tempfile::Builder::new()
            .prefix("lzplan")
            .tempdir_in(dir)
            .with_context(|| format!("create plan scratch dir in {}", dir.display()))?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("compute timestamp")?
            .as_secs();
        let plan_path = scratch.path().join(format!("plan-{stamp}"));

        let mut args: Vec<OsString> = vec!["plan".into(), "-input=false".into(), "-out".into()];
        args.push(plan_path.clone().into_os_string());
        push_var_args(&mut args, var_files, vars);
        self.run(dir, &args, verbose)?;

        let plan_path = plan_path
            .to_str()
            .ok_or_else(|| anyhow!("plan path is not valid UTF-8"))?;
        let rendered = self.run_capture(dir, &["show", "-no-color", plan_path])?;
        Ok(PlanOutput { rendered })
    }

    fn apply(
        &self,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[Var],
        targets: &[String],
        verbose: bool,
    ) -> Result<()> {
        let mut args: Vec<OsString> =
            vec!["apply".into(), "-input=false".into(), "-auto-approve".into()];
        push_var_args(&mut args, var_files, vars);
        push_target_args(&mut args, targets);
        self.run(dir, &args, verbose)
    }

    fn destroy(
        &self,
        dir: &Path,
        var_files: &[PathBuf],
        vars: &[Var],
        targets: &[String],
        verbose: bool,
    ) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            "destroy".into(),
            "-input=false".into(),
            "-auto-approve".into(),
        ];
        push_var_args(&mut args, var_files, vars);
        push_target_args(&mut args, targets);
        self.run(dir, &args, verbose)
    }

    fn output(&self, dir: &Path, key: &str) -> Result<String> {
        let stdout = self.run_capture(dir, &["output", "-json"])?;
        let outputs: serde_json::Value =
            serde_json::from_str(&stdout).context("parse terraform output JSON")?;
        let value = outputs
            .get(key)
            .and_then(|entry| entry.get("value"))
            .ok_or_else(|| anyhow!("output value {key} not found"))?;
        Ok(match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn state_pull(&self, dir: &Path) -> Result<String> {
        self.run_capture(dir, &["state", "pull"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_assignments_render_as_key_equals_value() {
        assert_eq!(Var::new("region", "us-central1").assignment(), "region=us-central1");
    }

    #[test]
    fn var_and_target_args_follow_cli_syntax() {
        let mut args = Vec::new();
        push_var_args(
            &mut args,
            &[PathBuf::from("/cfg/landzone-fast.tfvars.json")],
            &[Var::new("env_size", "small")],
        );
        push_target_args(&mut args, &["module.seed".to_string()]);
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "-var-file=/cfg/landzone-fast.tfvars.json",
                "-var",
                "env_size=small",
                "-target=module.seed",
            ]
        );
    }
}
