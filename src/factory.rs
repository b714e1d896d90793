//! Post-clone rewrite steps applied to generated configuration files before
//! a stage is ever planned or applied.
use anyhow::{Context, Result};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A factory rewrites a directory of files in place. Implementations must be
/// idempotent: re-applying the same prefix yields the same output.
pub trait Factory {
    fn apply(&self, prefix: &str) -> Result<()>;
}

/// Namespaces custom role identifiers with the environment prefix. Role
/// names are org-global upstream, so two environments in one org would
/// otherwise collide.
pub struct RoleFactory {
    path: PathBuf,
}

impl RoleFactory {
    pub fn new(stage_path: &Path) -> Self {
        Self {
            path: stage_path.join("data/custom-roles"),
        }
    }

    fn rewrite_file(path: &Path, prefix: &str) -> Result<()> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let mut doc: Value =
            serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;

        let mut changed = false;
        if let Value::Mapping(map) = &mut doc {
            if let Some(Value::String(name)) = map.get_mut("name") {
                let tag = format!("{prefix}_");
                if !name.starts_with(&tag) {
                    *name = format!("{tag}{name}");
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(());
        }

        let out = serde_yaml::to_string(&doc).context("serialize role definition")?;
        fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
        debug!(file = %path.display(), "namespaced custom role");
        Ok(())
    }
}

impl Factory for RoleFactory {
    fn apply(&self, prefix: &str) -> Result<()> {
        let entries = fs::read_dir(&self.path)
            .with_context(|| format!("read role factory dir {}", self.path.display()))?;
        for entry in entries {
            let path = entry.context("read role factory entry")?.path();
            if !path.is_file() {
                continue;
            }
            Self::rewrite_file(&path, prefix)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_with_role(yaml: &str) -> (tempfile::TempDir, RoleFactory, PathBuf) {
        let stage = tempfile::tempdir().expect("tempdir");
        let roles_dir = stage.path().join("data/custom-roles");
        fs::create_dir_all(&roles_dir).expect("create roles dir");
        let role_path = roles_dir.join("network_admin.yaml");
        fs::write(&role_path, yaml).expect("write role");
        let factory = RoleFactory::new(stage.path());
        (stage, factory, role_path)
    }

    fn role_name(path: &Path) -> String {
        let doc: Value =
            serde_yaml::from_str(&fs::read_to_string(path).expect("read role")).expect("parse");
        doc.get("name")
            .and_then(Value::as_str)
            .expect("name field")
            .to_string()
    }

    #[test]
    fn role_names_are_prefixed() {
        let (_stage, factory, role_path) = factory_with_role(
            "name: network_viewer\ntitle: Network Viewer\npermissions:\n  - compute.networks.get\n",
        );
        factory.apply("demo1").expect("apply factory");
        assert_eq!(role_name(&role_path), "demo1_network_viewer");

        // Untouched fields survive the rewrite.
        let doc: Value =
            serde_yaml::from_str(&fs::read_to_string(&role_path).expect("read")).expect("parse");
        assert_eq!(
            doc.get("title").and_then(Value::as_str),
            Some("Network Viewer")
        );
    }

    #[test]
    fn applying_the_same_prefix_twice_does_not_double_prefix() {
        let (_stage, factory, role_path) = factory_with_role("name: org_auditor\n");
        factory.apply("demo1").expect("first apply");
        factory.apply("demo1").expect("second apply");
        assert_eq!(role_name(&role_path), "demo1_org_auditor");
    }

    #[test]
    fn files_without_a_name_field_are_left_alone() {
        let (_stage, factory, role_path) = factory_with_role("title: No Name Here\n");
        let before = fs::read_to_string(&role_path).expect("read before");
        factory.apply("demo1").expect("apply");
        assert_eq!(fs::read_to_string(&role_path).expect("read after"), before);
    }
}
