//! Identity and organization helpers over the gcloud CLI.
use crate::descriptor::Organization;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

pub struct Gcloud {
    binary: PathBuf,
}

#[derive(Deserialize)]
struct OrgEntry {
    name: String,
    #[serde(default)]
    owner: Option<OrgOwner>,
}

#[derive(Deserialize)]
struct OrgOwner {
    #[serde(rename = "directoryCustomerId", default)]
    directory_customer_id: String,
}

impl Gcloud {
    pub fn locate() -> Result<Self> {
        let binary = which::which("gcloud").context("gcloud not found in PATH")?;
        Ok(Self { binary })
    }

    /// Email of the current principal, establishing application-default
    /// credentials interactively when none are present.
    pub fn application_default_email(&self) -> Result<String> {
        if self.adc_valid() {
            println!("Found default cloud credentials - skipping authorization");
            return self.account_email();
        }

        println!("No default credentials found - authorizing");
        let status = Command::new(&self.binary)
            .args(["auth", "application-default", "login", "--no-launch-browser"])
            .status()
            .context("spawn gcloud auth login")?;
        if !status.success() {
            bail!("gcloud auth application-default login exited with {status}");
        }
        self.account_email()
    }

    fn adc_valid(&self) -> bool {
        Command::new(&self.binary)
            .args(["auth", "application-default", "print-access-token"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn account_email(&self) -> Result<String> {
        let stdout = self.capture(&["config", "get-value", "account"])?;
        let email = stdout.trim();
        if email.is_empty() {
            bail!("no active gcloud account configured");
        }
        Ok(email.to_string())
    }

    /// Resolve a domain to exactly one organization. Zero or multiple
    /// matches are both errors.
    pub fn find_organization(&self, domain: &str) -> Result<Organization> {
        println!("Getting organization details for {domain}");
        let stdout = self.capture(&[
            "organizations",
            "list",
            "--filter",
            &format!("domain:{domain}"),
            "--format",
            "json",
        ])?;
        let entries: Vec<OrgEntry> =
            serde_json::from_str(&stdout).context("parse organizations list JSON")?;

        match entries.len() {
            0 => bail!("no organization found for domain {domain}"),
            1 => {}
            n => bail!("{n} organizations found for domain {domain} - multiple orgs not supported"),
        }

        let entry = &entries[0];
        let id = entry
            .name
            .rsplit('/')
            .next()
            .ok_or_else(|| anyhow!("malformed organization name {}", entry.name))?
            .parse::<u64>()
            .with_context(|| format!("parse organization id from {}", entry.name))?;
        Ok(Organization {
            domain: domain.to_string(),
            id,
            customer_id: entry
                .owner
                .as_ref()
                .map(|owner| owner.directory_customer_id.clone())
                .unwrap_or_default(),
        })
    }

    /// Grant each role to `member` on the organization. Per-role bindings
    /// are additive, so no policy read-modify-write cycle is needed.
    pub fn grant_org_roles(&self, org_id: u64, member: &str, roles: &[&str]) -> Result<()> {
        for role in roles {
            debug!(org_id, member, role, "granting organization role");
            self.capture(&[
                "organizations",
                "add-iam-policy-binding",
                &org_id.to_string(),
                "--member",
                member,
                "--role",
                role,
                "--format",
                "none",
            ])
            .with_context(|| format!("grant {role} to {member}"))?;
        }
        Ok(())
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .context("spawn gcloud")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "gcloud {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
