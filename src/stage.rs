//! Stage: one deployable unit of infrastructure with its own working
//! directory, source repository, backend, and variable dependencies.
use crate::factory::Factory;
use crate::progress::{self, HEARTBEAT_INTERVAL};
use crate::repo::Repo;
use crate::storage::ObjectStore;
use crate::terraform::{Engine, PlanOutput, Var};
use crate::vars::{ProviderFile, VarsFile};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const BOOTSTRAP_STAGE: &str = "0-bootstrap";
pub const RESMAN_STAGE: &str = "1-resman";

/// Fixed foundation topology: bootstrap, then resource management.
const FOUNDATION_STAGES: [&str; 2] = [BOOTSTRAP_STAGE, RESMAN_STAGE];
/// Variable artifacts the resource-management stage depends on.
const RESMAN_DEPS: [&str; 2] = ["0-globals", "0-bootstrap"];

pub const FOUNDATION_DIR: &str = "foundations";
pub const SEED_DIR: &str = "seeds";
const FOUNDATION_CLONE_DIR: &str = "fast";
const FOUNDATION_STAGES_SUBDIR: &str = "fast/stages";
const SEED_CLONE_DIR: &str = "seedbank";
const SEED_MODULES_SUBDIR: &str = "terraform";

pub const FOUNDATION_REPO: &str =
    "https://github.com/GoogleCloudPlatform/cloud-foundation-fabric.git";
pub const SEED_REPO: &str = "https://github.com/landzone-toolkit/landzone-seeds.git";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Foundation,
    Seed,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Foundation => "foundation",
            StageKind::Seed => "seed",
        }
    }
}

pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    pub path: PathBuf,
    pub repository: Repo,
    pub provider_file: Option<ProviderFile>,
    pub var_files: Vec<VarsFile>,
    pub factories: Vec<Box<dyn Factory>>,
}

/// Build the ordered foundation sequence. The bootstrap stage carries the
/// generic var files; resman carries its own dependency artifacts.
pub fn foundation_stages(
    config_path: &Path,
    prefix: &str,
    generic_vars: &[VarsFile],
) -> Vec<Stage> {
    let foundation_root = config_path.join(FOUNDATION_DIR);
    FOUNDATION_STAGES
        .iter()
        .map(|&name| {
            let var_files = if name == RESMAN_STAGE {
                RESMAN_DEPS
                    .iter()
                    .map(|&dep| VarsFile::dependency(dep, &foundation_root.join(name), prefix))
                    .collect()
            } else {
                generic_vars.to_vec()
            };

            let mut repository = Repo::new(FOUNDATION_REPO, config_path.join(FOUNDATION_CLONE_DIR));
            repository.set_link(
                foundation_root.clone(),
                config_path
                    .join(FOUNDATION_CLONE_DIR)
                    .join(FOUNDATION_STAGES_SUBDIR),
            );

            Stage {
                name: name.to_string(),
                kind: StageKind::Foundation,
                path: foundation_root.join(name),
                repository,
                provider_file: Some(ProviderFile::new(name, prefix, &foundation_root)),
                var_files,
                factories: Vec::new(),
            }
        })
        .collect()
}

/// A seed stage shell: repository binding only, hydrated later once the
/// template name and prefix are known.
pub fn seed_stage(config_path: &Path) -> Stage {
    let mut repository = Repo::new(SEED_REPO, config_path.join(SEED_CLONE_DIR));
    repository.set_link(
        config_path.join(SEED_DIR),
        config_path.join(SEED_CLONE_DIR).join(SEED_MODULES_SUBDIR),
    );
    Stage {
        name: String::new(),
        kind: StageKind::Seed,
        path: PathBuf::new(),
        repository,
        provider_file: None,
        var_files: Vec::new(),
        factories: Vec::new(),
    }
}

impl Stage {
    pub fn hydrate_seed(&mut self, name: &str, prefix: &str, config_path: &Path) {
        let seed_root = config_path.join(SEED_DIR);
        self.name = name.to_string();
        self.path = seed_root.join(name);
        self.provider_file = Some(ProviderFile::new(name, prefix, &seed_root));
    }

    pub fn add_var_file(&mut self, file: VarsFile) {
        self.var_files.push(file);
    }

    pub fn set_factory(&mut self, factory: Box<dyn Factory>) {
        self.factories.push(factory);
    }

    pub fn apply_factories(&self, prefix: &str) -> Result<()> {
        for factory in &self.factories {
            factory.apply(prefix)?;
        }
        Ok(())
    }

    /// Download every required var file and the provider file. Fails fast on
    /// the first missing artifact; callers treat failure as first-run on
    /// this machine, not as fatal.
    pub fn discover_files(&self, store: &dyn ObjectStore) -> Result<()> {
        for file in &self.var_files {
            file.download(store)?;
        }
        if let Some(provider) = &self.provider_file {
            provider.download(store)?;
        }
        Ok(())
    }

    /// Initialize the backend, discovering empirically whether local or
    /// remote state is authoritative: state-pull probe first, then a plain
    /// init, then init with state migration as the last resort.
    pub fn init(&self, engine: &dyn Engine, verbose: bool) -> Result<()> {
        if !self.path.is_dir() {
            bail!(
                "stage {} working directory {} is missing - run landzone configure first",
                self.name,
                self.path.display()
            );
        }

        if engine.state_pull(&self.path).is_ok() {
            debug!(stage = %self.name, "backend already initialized");
            return Ok(());
        }
        if engine.init(&self.path, false, verbose).is_ok() {
            return Ok(());
        }
        engine
            .init(&self.path, true, verbose)
            .with_context(|| format!("initialize stage {} with state migration", self.name))
    }

    /// Non-mutating feasibility probe; the rendered plan is returned and the
    /// scratch artifacts are cleaned by the adapter.
    pub fn plan(&self, engine: &dyn Engine, verbose: bool) -> Result<PlanOutput> {
        let var_files = self.var_file_paths();
        progress::with_heartbeat(self.kind.as_str(), HEARTBEAT_INTERVAL, || {
            engine.plan(&self.path, &var_files, &[], verbose)
        })
    }

    pub fn apply(&self, engine: &dyn Engine, vars: &[Var], verbose: bool) -> Result<()> {
        let var_files = self.var_file_paths();
        progress::with_heartbeat(&self.name, HEARTBEAT_INTERVAL, || {
            engine.apply(&self.path, &var_files, vars, &[], verbose)
        })
    }

    pub fn destroy(&self, engine: &dyn Engine, vars: &[Var], verbose: bool) -> Result<()> {
        let var_files = self.var_file_paths();
        progress::with_heartbeat(&self.name, HEARTBEAT_INTERVAL, || {
            engine.destroy(&self.path, &var_files, vars, &[], verbose)
        })
    }

    fn var_file_paths(&self) -> Vec<PathBuf> {
        self.var_files
            .iter()
            .map(|file| file.local_path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::bucket_name;

    #[test]
    fn foundation_topology_is_bootstrap_then_resman() {
        let config = Path::new("/cfg");
        let generic = [VarsFile::descriptor(config, "demo1")];
        let stages = foundation_stages(config, "demo1", &generic);

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, BOOTSTRAP_STAGE);
        assert_eq!(stages[1].name, RESMAN_STAGE);
        assert!(stages.iter().all(|s| s.kind == StageKind::Foundation));
        assert_eq!(stages[0].path, config.join("foundations/0-bootstrap"));

        // Bootstrap carries the generic files; resman its own dependencies.
        assert_eq!(stages[0].var_files.len(), 1);
        assert_eq!(stages[0].var_files[0].name, generic[0].name);
        let resman_deps: Vec<&str> = stages[1]
            .var_files
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(resman_deps, ["0-globals", "0-bootstrap"]);
    }

    #[test]
    fn seed_hydration_fills_name_path_and_provider() {
        let config = Path::new("/cfg");
        let mut seed = seed_stage(config);
        assert!(seed.provider_file.is_none());

        seed.hydrate_seed("data-cloud", "demo1", config);
        assert_eq!(seed.name, "data-cloud");
        assert_eq!(seed.path, config.join("seeds/data-cloud"));
        let provider = seed.provider_file.expect("provider");
        assert_eq!(provider.bucket, bucket_name("demo1"));
        assert_eq!(provider.remote_path, "providers/data-cloud-providers.tf");
    }

    #[test]
    fn init_refuses_a_missing_working_directory() {
        struct NeverEngine;
        impl Engine for NeverEngine {
            fn init(&self, _: &Path, _: bool, _: bool) -> Result<()> {
                panic!("init must not be reached");
            }
            fn plan(
                &self,
                _: &Path,
                _: &[PathBuf],
                _: &[Var],
                _: bool,
            ) -> Result<PlanOutput> {
                panic!("plan must not be reached");
            }
            fn apply(&self, _: &Path, _: &[PathBuf], _: &[Var], _: &[String], _: bool) -> Result<()> {
                panic!("apply must not be reached");
            }
            fn destroy(
                &self,
                _: &Path,
                _: &[PathBuf],
                _: &[Var],
                _: &[String],
                _: bool,
            ) -> Result<()> {
                panic!("destroy must not be reached");
            }
            fn output(&self, _: &Path, _: &str) -> Result<String> {
                panic!("output must not be reached");
            }
            fn state_pull(&self, _: &Path) -> Result<String> {
                panic!("state_pull must not be reached");
            }
        }

        let config = tempfile::tempdir().expect("tempdir");
        let stages = foundation_stages(config.path(), "demo1", &[]);
        let err = stages[0].init(&NeverEngine, false).expect_err("missing dir");
        assert!(err.to_string().contains("working directory"), "{err}");
    }
}
