//! Named variable-file and provider-file artifacts.
//!
//! Each artifact pairs a local path with a deterministic remote location, so
//! any machine can rebuild the environment from the bucket alone.
use crate::storage::ObjectStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Appended to the environment prefix to derive the canonical output bucket.
pub const OUTPUT_BUCKET_SUFFIX: &str = "-prod-iac-core-outputs-0";

/// The environment descriptor doubles as the hydrated var file for the
/// bootstrap and seed stages.
pub const DESCRIPTOR_FILE_NAME: &str = "landzone-fast.tfvars.json";

const VAR_DIR: &str = "tfvars";
const VAR_SUFFIX: &str = ".auto.tfvars.json";
const PROVIDER_DIR: &str = "providers";
const PROVIDER_SUFFIX: &str = "-providers.tf";

/// Canonical storage bucket for an environment. The prefix alone determines
/// it; no separate bucket configuration exists anywhere.
pub fn bucket_name(prefix: &str) -> String {
    format!("{prefix}{OUTPUT_BUCKET_SUFFIX}")
}

#[derive(Debug, Clone)]
pub struct VarsFile {
    pub name: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bucket: String,
}

impl VarsFile {
    /// The descriptor var file at the config root. An empty prefix leaves the
    /// bucket unset until the descriptor has been hydrated.
    pub fn descriptor(config_path: &Path, prefix: &str) -> Self {
        let bucket = if prefix.is_empty() {
            String::new()
        } else {
            bucket_name(prefix)
        };
        Self {
            name: DESCRIPTOR_FILE_NAME.to_string(),
            local_path: config_path.join(DESCRIPTOR_FILE_NAME),
            remote_path: format!("{VAR_DIR}/{DESCRIPTOR_FILE_NAME}"),
            bucket,
        }
    }

    /// A dependency var file that lives inside a stage working directory and
    /// is discovered from remote storage before the stage runs.
    pub fn dependency(name: &str, stage_dir: &Path, prefix: &str) -> Self {
        let file_name = format!("{name}{VAR_SUFFIX}");
        Self {
            name: name.to_string(),
            local_path: stage_dir.join(&file_name),
            remote_path: format!("{VAR_DIR}/{file_name}"),
            bucket: bucket_name(prefix),
        }
    }

    pub fn set_bucket(&mut self, prefix: &str) {
        self.bucket = bucket_name(prefix);
    }

    pub fn upload(&self, store: &dyn ObjectStore) -> Result<()> {
        store
            .upload(&self.bucket, &self.remote_path, &self.local_path)
            .with_context(|| format!("upload var file {}", self.name))
    }

    pub fn download(&self, store: &dyn ObjectStore) -> Result<()> {
        store
            .download(&self.bucket, &self.local_path, &self.remote_path)
            .with_context(|| format!("download var file {}", self.name))
    }

    pub fn exists_remote(&self, store: &dyn ObjectStore) -> Result<bool> {
        store.exists(&self.bucket, &self.remote_path)
    }
}

/// Backend/provider configuration generated by the bootstrap apply and
/// mirrored to remote storage per stage.
#[derive(Debug, Clone)]
pub struct ProviderFile {
    pub name: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bucket: String,
}

impl ProviderFile {
    pub fn new(stage: &str, prefix: &str, stage_root: &Path) -> Self {
        let file_name = format!("{stage}{PROVIDER_SUFFIX}");
        Self {
            name: stage.to_string(),
            local_path: stage_root.join(stage).join(&file_name),
            remote_path: format!("{PROVIDER_DIR}/{file_name}"),
            bucket: bucket_name(prefix),
        }
    }

    pub fn download(&self, store: &dyn ObjectStore) -> Result<()> {
        store
            .download(&self.bucket, &self.local_path, &self.remote_path)
            .with_context(|| format!("download provider file {}", self.name))
    }
}
