//! Environment descriptor: the single source of truth for an environment.
//!
//! Created once by `configure`, persisted as JSON under the config dir,
//! hydrated by every pipeline run, and never mutated by the pipeline itself.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Resource names, bucket names, and log-sink keys all embed the prefix;
/// anything longer than this overflows downstream naming limits.
pub const MAX_PREFIX_LEN: usize = 9;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EnvDescriptor {
    pub organization: Option<Organization>,
    pub billing_account: Option<BillingAccount>,
    #[serde(default)]
    pub bootstrap_user: String,
    pub fast_features: Option<Features>,
    pub locations: Option<Locations>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log_sinks: LogSinks,
    pub groups: Option<Groups>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub iam: BTreeMap<String, Vec<String>>,
    #[serde(
        default,
        rename = "iam_bindings_additive",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub iam_additive: BTreeMap<String, IamAdditive>,
}

pub type LogSinks = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub domain: String,
    pub id: u64,
    pub customer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAccount {
    pub id: String,
    pub is_org_level: bool,
    pub no_iam: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub sandbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Locations {
    pub bq: String,
    pub gcs: String,
    pub logging: String,
    pub pubsub: Vec<String>,
}

/// One non-authoritative binding: a single member granted a single role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamAdditive {
    pub member: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Groups {
    #[serde(rename = "gcp-billing-admins")]
    pub billing_admins: String,
    #[serde(rename = "gcp-devops")]
    pub devops: String,
    #[serde(rename = "gcp-network-admins")]
    pub network_admins: String,
    #[serde(rename = "gcp-organization-admins")]
    pub organization_admins: String,
    #[serde(rename = "gcp-security-admins")]
    pub security_admins: String,
    #[serde(rename = "gcp-support")]
    pub support: String,
}

impl EnvDescriptor {
    pub fn set_organization(&mut self, org: Organization) {
        self.organization = Some(org);
    }

    pub fn set_billing(&mut self, account_id: &str, internal: bool) {
        self.billing_account = Some(BillingAccount {
            id: account_id.to_string(),
            is_org_level: false,
            no_iam: internal,
        });
    }

    pub fn set_user(&mut self, email: &str) {
        self.bootstrap_user = email.to_string();
    }

    pub fn set_features(&mut self, sandbox: bool) {
        self.fast_features = Some(Features { sandbox });
    }

    /// One location flag fans out to every location field through a single
    /// explicit mapping, so a new field cannot be silently missed.
    pub fn set_locations(&mut self, location: &str) {
        self.locations = Some(Locations {
            bq: location.to_string(),
            gcs: location.to_string(),
            logging: "global".to_string(),
            pubsub: Vec::new(),
        });
    }

    /// Fails without touching the descriptor when the prefix is too long.
    pub fn set_prefix(&mut self, prefix: &str) -> Result<()> {
        let len = prefix.chars().count();
        if len > MAX_PREFIX_LEN {
            bail!("prefix {prefix:?} is {len} characters, maximum is {MAX_PREFIX_LEN}");
        }
        self.prefix = prefix.to_string();
        Ok(())
    }

    /// Namespace every sink key with the prefix; upstream sink names are not
    /// unique per environment on their own.
    pub fn set_log_sinks(&mut self, prefix: &str, sinks: LogSinks) {
        self.log_sinks = sinks
            .into_iter()
            .map(|(name, sink)| (format!("{prefix}{name}"), sink))
            .collect();
    }

    pub fn set_groups(&mut self, group: &str) {
        let group = group.to_string();
        self.groups = Some(Groups {
            billing_admins: group.clone(),
            devops: group.clone(),
            network_admins: group.clone(),
            organization_admins: group.clone(),
            security_admins: group.clone(),
            support: group,
        });
    }

    /// Add an authoritative role binding. Role keys must be unique.
    pub fn add_iam_binding(&mut self, role: &str, members: Vec<String>) -> Result<()> {
        if self.iam.contains_key(role) {
            bail!("duplicate IAM role {role} - authoritative roles must be unique");
        }
        self.iam.insert(role.to_string(), members);
        Ok(())
    }

    /// Add non-authoritative bindings. Role keys must be unique.
    pub fn add_iam_members(&mut self, policies: &[IamAdditive]) -> Result<()> {
        for policy in policies {
            if self.iam_additive.contains_key(&policy.role) {
                bail!(
                    "duplicate IAM role {} - additive roles must be unique",
                    policy.role
                );
            }
            self.iam_additive.insert(policy.role.clone(), policy.clone());
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serialize environment descriptor")?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let descriptor = serde_json::from_str(&content)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(descriptor)
    }
}
