//! Command workflows: everything between argument parsing and the pipeline.
use crate::cli::{ConfigureArgs, SeedArgs, SeedTemplate};
use crate::descriptor::{EnvDescriptor, IamAdditive, LogSinks};
use crate::factory::RoleFactory;
use crate::gcloud::Gcloud;
use crate::pipeline::{Pipeline, RunAction, RunConfig};
use crate::preflight;
use crate::stage::{foundation_stages, seed_stage, StageKind, BOOTSTRAP_STAGE};
use crate::storage::GcloudStorage;
use crate::terraform::Terraform;
use crate::util;
use crate::vars::VarsFile;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Roles the owning identity group needs on the organization before the
/// bootstrap stage can run.
const GROUP_IAM_ROLES: [&str; 8] = [
    "roles/billing.admin",
    "roles/logging.admin",
    "roles/iam.organizationRoleAdmin",
    "roles/resourcemanager.projectCreator",
    "roles/resourcemanager.organizationAdmin",
    "roles/resourcemanager.tagAdmin",
    "roles/resourcemanager.folderAdmin",
    "roles/owner",
];

/// Bindings carried by internal environments for the administrator SA.
const INTERNAL_IAM_ROLES: [&str; 1] = ["roles/resourcemanager.organizationAdmin"];
const INTERNAL_IAM_ADDITIVE_ROLES: [&str; 1] = ["roles/orgpolicy.policyAdmin"];

/// Organization IAM changes are eventually consistent; grants made here must
/// be visible before the bootstrap apply starts.
const IAM_PROPAGATION_WAIT: Duration = Duration::from_secs(10);

/// Upstream sink names are not unique per environment, so internal
/// environments override them with prefix-namespaced definitions.
fn default_log_sinks() -> LogSinks {
    let sink = |filter: &str| {
        BTreeMap::from([
            ("filter".to_string(), filter.to_string()),
            ("type".to_string(), "logging".to_string()),
        ])
    };
    LogSinks::from([
        (
            "audit-logs".to_string(),
            sink(
                "logName:\"/logs/cloudaudit.googleapis.com%2Factivity\" OR \
                 logName:\"/logs/cloudaudit.googleapis.com%2Fsystem_event\"",
            ),
        ),
        (
            "vpc-sc".to_string(),
            sink(
                "protoPayload.metadata.@type=\
                 \"type.googleapis.com/google.cloud.audit.VpcServiceControlAuditMetadata\"",
            ),
        ),
    ])
}

pub fn run_configure(args: &ConfigureArgs) -> Result<()> {
    println!("Running preflight checks");
    preflight::check()?;

    let config_path = util::config_path()?;
    if util::ensure_dir(&config_path)? {
        println!("Created config directory at: {}", config_path.display());
    } else {
        println!("Config directory already exists at: {}", config_path.display());
    }

    let gcloud = Gcloud::locate()?;
    let store = GcloudStorage::locate()?;
    let email = gcloud
        .application_default_email()
        .context("unable to authorize with the cloud provider")?;

    let descriptor_file = VarsFile::descriptor(&config_path, &args.prefix);
    if args.rehydrate {
        println!("Sourcing existing configuration from the outputs bucket");
        descriptor_file
            .download(&store)
            .context("download existing environment configuration")?;
    } else {
        println!("Building a new configuration");
        if descriptor_file.exists_remote(&store).unwrap_or(false) {
            bail!(
                "existing environment for prefix {} found - rerun configure with --rehydrate",
                args.prefix
            );
        }
        let descriptor = build_descriptor(args, &gcloud, &email)?;

        let group = args
            .group_owner
            .as_deref()
            .ok_or_else(|| anyhow!("--group-owner is required"))?;
        println!("Applying prerequisite roles to group: {group}");
        let org = descriptor
            .organization
            .as_ref()
            .ok_or_else(|| anyhow!("descriptor is missing the organization"))?;
        gcloud
            .grant_org_roles(org.id, &format!("group:{group}"), &GROUP_IAM_ROLES)
            .with_context(|| format!("apply prerequisite roles to group {group}"))?;

        println!("Waiting for role assignment propagation");
        thread::sleep(IAM_PROPAGATION_WAIT);

        println!(
            "Writing configuration file to: {}",
            descriptor_file.local_path.display()
        );
        descriptor.write(&descriptor_file.local_path)?;
    }

    prepare_working_directories(args, &config_path)?;
    println!("\nConfigure complete - environment hydrated");
    Ok(())
}

fn build_descriptor(args: &ConfigureArgs, gcloud: &Gcloud, email: &str) -> Result<EnvDescriptor> {
    let domain = args
        .domain
        .as_deref()
        .ok_or_else(|| anyhow!("--domain is required unless rehydrating"))?;
    let billing_account = args
        .billing_account
        .as_deref()
        .ok_or_else(|| anyhow!("--billing-account is required"))?;
    let group = args
        .group_owner
        .as_deref()
        .ok_or_else(|| anyhow!("--group-owner is required"))?;

    let mut descriptor = EnvDescriptor::default();
    descriptor.set_organization(gcloud.find_organization(domain)?);
    descriptor.set_billing(billing_account, args.internal);
    descriptor.set_user(email);
    // The sandbox folder only exists to host seed deployments.
    descriptor.set_features(!args.skip_seed);
    descriptor.set_locations(&args.location);
    descriptor.set_prefix(&args.prefix)?;
    descriptor.set_groups(group);

    if args.internal {
        let admin_sa = args
            .org_admin_sa
            .as_deref()
            .ok_or_else(|| anyhow!("--org-admin-sa is required for internal environments"))?;
        let member = format!("serviceAccount:{admin_sa}");
        for role in INTERNAL_IAM_ROLES {
            descriptor.add_iam_binding(role, vec![member.clone()])?;
        }
        let additive: Vec<IamAdditive> = INTERNAL_IAM_ADDITIVE_ROLES
            .iter()
            .map(|role| IamAdditive {
                member: member.clone(),
                role: role.to_string(),
            })
            .collect();
        descriptor
            .add_iam_members(&additive)
            .context("set additive IAM policy")?;
        descriptor.set_log_sinks(&args.prefix, default_log_sinks());
    }
    Ok(descriptor)
}

/// Clone the pinned sources, alias the stage directories into them, and run
/// the bootstrap rewrite factories.
fn prepare_working_directories(args: &ConfigureArgs, config_path: &Path) -> Result<()> {
    let descriptor_file = VarsFile::descriptor(config_path, &args.prefix);
    let mut stages = foundation_stages(config_path, &args.prefix, &[descriptor_file]);
    if !args.skip_seed {
        stages.push(seed_stage(config_path));
    }

    let mut foundation_ready = false;
    for stage in &mut stages {
        match stage.kind {
            StageKind::Foundation => {
                // All foundation stages share one clone.
                if foundation_ready {
                    continue;
                }
                foundation_ready = true;
                println!(
                    "Using {} tag for the foundation framework",
                    args.foundation_version
                );
                stage
                    .repository
                    .set_ref(&format!("refs/tags/{}", args.foundation_version));
            }
            StageKind::Seed => {
                println!("Using {} tag for the seed modules", args.seed_version);
                stage
                    .repository
                    .set_ref(&format!("refs/tags/{}", args.seed_version));
            }
        }

        println!("Cloning repository for {}", stage.kind.as_str());
        stage.repository.clone_repo(false)?;
        stage.repository.link()?;

        if stage.name == BOOTSTRAP_STAGE {
            println!("Updating custom role names in the role factory");
            stage.set_factory(Box::new(RoleFactory::new(&stage.path)));
            stage.apply_factories(&args.prefix)?;
        }
    }
    Ok(())
}

pub fn run_pipeline(action: RunAction, args: &SeedArgs) -> Result<()> {
    check_template(action, args.seed)?;
    preflight::check()?;

    let gcloud = Gcloud::locate()?;
    gcloud
        .application_default_email()
        .context("unable to authorize with the cloud provider")?;

    let config_path = util::config_path()?;
    let mut descriptor_file = VarsFile::descriptor(&config_path, "");
    let descriptor = EnvDescriptor::read(&descriptor_file.local_path).context(
        "unable to read the environment descriptor - try running landzone configure --rehydrate",
    )?;
    descriptor_file.set_bucket(&descriptor.prefix);
    info!(prefix = %descriptor.prefix, "hydrated environment descriptor");

    let mut stages =
        foundation_stages(&config_path, &descriptor.prefix, &[descriptor_file.clone()]);
    if args.seed != SeedTemplate::Foundation {
        let mut seed = seed_stage(&config_path);
        seed.hydrate_seed(args.seed.name(), &descriptor.prefix, &config_path);
        seed.add_var_file(descriptor_file.clone());
        stages.push(seed);
    }

    let engine = Terraform::locate()?;
    let store = GcloudStorage::locate()?;
    let config = RunConfig {
        action,
        region: args.region.clone(),
        size: args.size,
        dry_run: args.dry_run,
        skip_foundation: args.skip_foundation,
        local_only: args.local_only,
        internal: args.internal,
        verbose: args.verbose,
        seed_output: args.seed.service_output().map(str::to_string),
    };
    Pipeline::new(&engine, &store, config).run(&stages, &descriptor_file)
}

/// The foundation pseudo-template deploys the landing zone alone; there is
/// no seed stage to destroy, and destroying the foundation itself is out of
/// bounds for this tool.
fn check_template(action: RunAction, template: SeedTemplate) -> Result<()> {
    if action == RunAction::Destroy && template == SeedTemplate::Foundation {
        bail!(
            "the foundation template cannot be destroyed - remove the bootstrap projects manually"
        );
    }
    Ok(())
}
