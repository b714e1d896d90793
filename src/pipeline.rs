//! Sequencing policy for a pipeline run.
//!
//! Stages execute strictly in order; a failure aborts the run and leaves
//! every later stage untouched. All run-scoped knobs live in an immutable
//! [`RunConfig`] built once by `workflow`.
use crate::cli::SizeClass;
use crate::stage::{Stage, StageKind, BOOTSTRAP_STAGE};
use crate::storage::ObjectStore;
use crate::terraform::{Engine, Var};
use crate::vars::VarsFile;
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Apply,
    Destroy,
}

pub struct RunConfig {
    pub action: RunAction,
    pub region: String,
    pub size: SizeClass,
    pub dry_run: bool,
    pub skip_foundation: bool,
    pub local_only: bool,
    pub internal: bool,
    pub verbose: bool,
    /// Engine output key surfaced to the operator after a seed apply.
    pub seed_output: Option<String>,
}

pub struct Pipeline<'a> {
    engine: &'a dyn Engine,
    store: &'a dyn ObjectStore,
    config: RunConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(engine: &'a dyn Engine, store: &'a dyn ObjectStore, config: RunConfig) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn run(&self, stages: &[Stage], descriptor: &VarsFile) -> Result<()> {
        for stage in stages {
            if self.should_skip(stage) {
                println!("Skipping foundation stage: {}", stage.name);
                continue;
            }

            if self.config.dry_run {
                if stage.name == BOOTSTRAP_STAGE {
                    self.dry_run(stage)?;
                }
                return Ok(());
            }

            // A failed discovery means the remote artifacts do not exist
            // yet; the stage runs against local state and publishes them
            // after its first successful apply.
            let first_run = self.detect_first_run(stage);

            println!("Initializing {}", stage.name);
            stage
                .init(self.engine, self.config.verbose)
                .with_context(|| format!("initialize stage {}", stage.name))?;

            match self.config.action {
                RunAction::Apply => {
                    println!("Deploying stage: {}", stage.name);
                    self.apply_stage(stage, descriptor, first_run)?;
                }
                RunAction::Destroy => {
                    println!("Destroying stage: {}", stage.name);
                    stage
                        .destroy(self.engine, &self.stage_vars(stage), self.config.verbose)
                        .with_context(|| format!("destroy stage {}", stage.name))?;
                }
            }
            println!("Stage complete: {}", stage.name);

            if stage.kind == StageKind::Seed && self.config.action == RunAction::Apply {
                self.report_seed_endpoint(stage);
            }
        }
        Ok(())
    }

    fn should_skip(&self, stage: &Stage) -> bool {
        stage.kind == StageKind::Foundation
            && (self.config.action == RunAction::Destroy || self.config.skip_foundation)
    }

    /// Feasibility probe: initialize and plan the bootstrap stage without
    /// mutating anything, then stop the run.
    fn dry_run(&self, stage: &Stage) -> Result<()> {
        println!("Testing if the foundation can be applied to this organization");
        stage
            .init(self.engine, self.config.verbose)
            .context("initialize bootstrap stage for dry run")?;
        let plan = stage
            .plan(self.engine, self.config.verbose)
            .context("the foundation cannot be applied to this organization")?;
        if self.config.verbose {
            println!("{}", plan.rendered);
        }
        println!("The foundation can be applied to this organization");
        Ok(())
    }

    fn detect_first_run(&self, stage: &Stage) -> bool {
        match stage.discover_files(self.store) {
            Ok(()) => false,
            Err(err) => {
                debug!(stage = %stage.name, error = %err, "remote discovery failed");
                println!("First run detected - running {} with local state", stage.name);
                true
            }
        }
    }

    fn apply_stage(&self, stage: &Stage, descriptor: &VarsFile, first_run: bool) -> Result<()> {
        stage
            .apply(self.engine, &self.stage_vars(stage), self.config.verbose)
            .with_context(|| format!("apply stage {}", stage.name))?;

        if self.config.local_only {
            info!(stage = %stage.name, "local-only run, skipping remote publication");
            return Ok(());
        }

        if stage.name == BOOTSTRAP_STAGE {
            println!("Uploading environment descriptor to the outputs bucket");
            descriptor
                .upload(self.store)
                .context("publish environment descriptor")?;
        }

        // The apply created the remote backend; discovery and the migrating
        // re-init must now succeed or local and remote state will diverge.
        if first_run {
            stage
                .discover_files(self.store)
                .with_context(|| format!("retrieve remote artifacts for {}", stage.name))?;
            stage
                .init(self.engine, self.config.verbose)
                .with_context(|| format!("migrate {} state to the remote backend", stage.name))?;
        }
        Ok(())
    }

    /// Best effort: a missing output leaves the run successful.
    fn report_seed_endpoint(&self, stage: &Stage) {
        let Some(key) = &self.config.seed_output else {
            return;
        };
        match self.engine.output(&stage.path, key) {
            Ok(endpoint) => {
                println!("Navigate to your service endpoint to get started: {endpoint}");
            }
            Err(err) => warn!(stage = %stage.name, error = %err, "service endpoint unavailable"),
        }
    }

    /// Run-scoped variables are injected into the seed stage only; the
    /// foundation stages read everything from their var files.
    fn stage_vars(&self, stage: &Stage) -> Vec<Var> {
        if stage.kind != StageKind::Seed {
            return Vec::new();
        }
        let mut vars = vec![Var::new("region", &self.config.region)];
        if let Some(provider) = &stage.provider_file {
            vars.push(Var::new("state_bucket", &provider.bucket));
            let state_dir = provider.remote_path.split('/').next().unwrap_or_default();
            vars.push(Var::new("state_dir", state_dir));
        }
        vars.push(Var::new("env_size", self.config.size.as_str()));
        if self.config.internal {
            vars.push(Var::new("internal_env", "true"));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{foundation_stages, seed_stage};
    use crate::terraform::PlanOutput;
    use anyhow::bail;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct RecordingEngine {
        log: CallLog,
    }

    impl RecordingEngine {
        fn new(log: CallLog) -> Self {
            Self { log }
        }

        fn record(&self, entry: String) {
            self.log.borrow_mut().push(entry);
        }

        fn stage_of(dir: &Path) -> String {
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        }
    }

    impl Engine for RecordingEngine {
        fn init(&self, dir: &Path, migrate: bool, _verbose: bool) -> Result<()> {
            self.record(format!("init:{}:migrate={migrate}", Self::stage_of(dir)));
            Ok(())
        }

        fn plan(
            &self,
            dir: &Path,
            _var_files: &[PathBuf],
            _vars: &[Var],
            _verbose: bool,
        ) -> Result<PlanOutput> {
            self.record(format!("plan:{}", Self::stage_of(dir)));
            Ok(PlanOutput::default())
        }

        fn apply(
            &self,
            dir: &Path,
            _var_files: &[PathBuf],
            vars: &[Var],
            _targets: &[String],
            _verbose: bool,
        ) -> Result<()> {
            let rendered: Vec<String> = vars
                .iter()
                .map(|v| format!("{}={}", v.key, v.value))
                .collect();
            self.record(format!(
                "apply:{}:[{}]",
                Self::stage_of(dir),
                rendered.join(",")
            ));
            Ok(())
        }

        fn destroy(
            &self,
            dir: &Path,
            _var_files: &[PathBuf],
            _vars: &[Var],
            _targets: &[String],
            _verbose: bool,
        ) -> Result<()> {
            self.record(format!("destroy:{}", Self::stage_of(dir)));
            Ok(())
        }

        fn output(&self, dir: &Path, key: &str) -> Result<String> {
            self.record(format!("output:{}:{key}", Self::stage_of(dir)));
            Ok("https://example.endpoint".to_string())
        }

        fn state_pull(&self, _dir: &Path) -> Result<String> {
            // No backend exists in tests, so the init probe always falls
            // through to a plain init.
            bail!("no state yet")
        }
    }

    /// Object store whose downloads fail for the first `missing` calls, then
    /// succeed, mimicking artifacts that appear after the bootstrap apply.
    struct MockStore {
        log: CallLog,
        missing: RefCell<usize>,
    }

    impl MockStore {
        fn new(log: CallLog, missing: usize) -> Self {
            Self {
                log,
                missing: RefCell::new(missing),
            }
        }
    }

    impl ObjectStore for MockStore {
        fn upload(&self, bucket: &str, object: &str, _local: &Path) -> Result<()> {
            self.log.borrow_mut().push(format!("upload:{bucket}/{object}"));
            Ok(())
        }

        fn download(&self, _bucket: &str, _local: &Path, object: &str) -> Result<()> {
            let mut missing = self.missing.borrow_mut();
            if *missing > 0 {
                *missing -= 1;
                bail!("object {object} not found");
            }
            self.log.borrow_mut().push(format!("download:{object}"));
            Ok(())
        }

        fn exists(&self, _bucket: &str, _object: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn test_config(action: RunAction) -> RunConfig {
        RunConfig {
            action,
            region: "us-central1".to_string(),
            size: SizeClass::Small,
            dry_run: false,
            skip_foundation: false,
            local_only: false,
            internal: false,
            verbose: false,
            seed_output: Some("datafusion_endpoint".to_string()),
        }
    }

    /// Full topology with working directories on disk so init passes its
    /// existence check.
    fn build_stages(config_path: &Path) -> (Vec<Stage>, VarsFile) {
        let descriptor = VarsFile::descriptor(config_path, "demo1");
        let mut stages = foundation_stages(config_path, "demo1", &[descriptor.clone()]);
        let mut seed = seed_stage(config_path);
        seed.hydrate_seed("data-cloud", "demo1", config_path);
        seed.add_var_file(descriptor.clone());
        stages.push(seed);
        for stage in &stages {
            fs::create_dir_all(&stage.path).expect("stage dir");
        }
        (stages, descriptor)
    }

    #[test]
    fn create_runs_every_stage_in_order_and_uploads_once() {
        let root = tempfile::tempdir().expect("tempdir");
        let (stages, descriptor) = build_stages(root.path());

        let log: CallLog = Rc::default();
        let engine = RecordingEngine::new(Rc::clone(&log));
        let store = MockStore::new(Rc::clone(&log), 0);
        Pipeline::new(&engine, &store, test_config(RunAction::Apply))
            .run(&stages, &descriptor)
            .expect("pipeline run");

        let log = log.borrow();
        let stage_ops: Vec<&str> = log
            .iter()
            .filter(|e| e.starts_with("init:") || e.starts_with("apply:") || e.starts_with("destroy:"))
            .map(|e| e.as_str())
            .collect();
        assert_eq!(
            stage_ops,
            [
                "init:0-bootstrap:migrate=false",
                "apply:0-bootstrap:[]",
                "init:1-resman:migrate=false",
                "apply:1-resman:[]",
                "init:data-cloud:migrate=false",
                "apply:data-cloud:[region=us-central1,state_bucket=demo1-prod-iac-core-outputs-0,state_dir=providers,env_size=small]",
            ]
        );

        // The descriptor goes up exactly once, after the bootstrap apply.
        let uploads: Vec<&str> = log
            .iter()
            .filter(|e| e.starts_with("upload:"))
            .map(|e| e.as_str())
            .collect();
        assert_eq!(
            uploads,
            ["upload:demo1-prod-iac-core-outputs-0/tfvars/landzone-fast.tfvars.json"]
        );

        // Endpoint lookup happens for the seed stage only.
        let outputs: Vec<&str> = log
            .iter()
            .filter(|e| e.starts_with("output:"))
            .map(|e| e.as_str())
            .collect();
        assert_eq!(outputs, ["output:data-cloud:datafusion_endpoint"]);
    }

    #[test]
    fn destroy_skips_foundation_stages() {
        let root = tempfile::tempdir().expect("tempdir");
        let (stages, descriptor) = build_stages(root.path());

        let log: CallLog = Rc::default();
        let engine = RecordingEngine::new(Rc::clone(&log));
        let store = MockStore::new(Rc::clone(&log), 0);
        Pipeline::new(&engine, &store, test_config(RunAction::Destroy))
            .run(&stages, &descriptor)
            .expect("pipeline run");

        let log = log.borrow();
        assert!(log.iter().all(|e| !e.contains("0-bootstrap") && !e.contains("1-resman")));
        assert!(log.iter().any(|e| e == "destroy:data-cloud"));
        assert!(log.iter().all(|e| !e.starts_with("upload:")));
    }

    #[test]
    fn first_run_rediscovers_and_reinitializes_after_bootstrap_apply() {
        let root = tempfile::tempdir().expect("tempdir");
        let (stages, descriptor) = build_stages(root.path());

        let log: CallLog = Rc::default();
        let engine = RecordingEngine::new(Rc::clone(&log));
        // The first download (the bootstrap descriptor probe) fails, then
        // every artifact exists, as if the apply just published them.
        let store = MockStore::new(Rc::clone(&log), 1);
        Pipeline::new(&engine, &store, test_config(RunAction::Apply))
            .run(&stages, &descriptor)
            .expect("pipeline run");

        let log = log.borrow();
        let bootstrap_ops: Vec<&str> = log
            .iter()
            .filter(|e| {
                e.starts_with("init:0-bootstrap")
                    || e.starts_with("apply:0-bootstrap")
                    || e.starts_with("upload:")
            })
            .map(|e| e.as_str())
            .collect();
        assert_eq!(
            bootstrap_ops,
            [
                "init:0-bootstrap:migrate=false",
                "apply:0-bootstrap:[]",
                "upload:demo1-prod-iac-core-outputs-0/tfvars/landzone-fast.tfvars.json",
                // Rediscovery is followed by a second init against the new
                // backend.
                "init:0-bootstrap:migrate=false",
            ]
        );
    }

    #[test]
    fn dry_run_plans_bootstrap_and_stops() {
        let root = tempfile::tempdir().expect("tempdir");
        let (stages, descriptor) = build_stages(root.path());

        let log: CallLog = Rc::default();
        let engine = RecordingEngine::new(Rc::clone(&log));
        let store = MockStore::new(Rc::clone(&log), 0);
        let mut config = test_config(RunAction::Apply);
        config.dry_run = true;
        Pipeline::new(&engine, &store, config)
            .run(&stages, &descriptor)
            .expect("pipeline run");

        let log = log.borrow();
        assert_eq!(
            log.as_slice(),
            ["init:0-bootstrap:migrate=false", "plan:0-bootstrap"]
        );
    }

    #[test]
    fn local_only_apply_never_touches_the_store() {
        let root = tempfile::tempdir().expect("tempdir");
        let (stages, descriptor) = build_stages(root.path());

        let log: CallLog = Rc::default();
        let engine = RecordingEngine::new(Rc::clone(&log));
        // Every download fails, so each stage is a first run.
        let store = MockStore::new(Rc::clone(&log), usize::MAX);
        let mut config = test_config(RunAction::Apply);
        config.local_only = true;
        Pipeline::new(&engine, &store, config)
            .run(&stages, &descriptor)
            .expect("pipeline run");

        let log = log.borrow();
        assert!(log.iter().all(|e| !e.starts_with("upload:") && !e.starts_with("download:")));
        assert!(log.iter().any(|e| e == "apply:1-resman:[]"));
    }
}
