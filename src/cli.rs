//! CLI argument parsing for the landing-zone workflow.
//!
//! The CLI is intentionally thin: it collects flags into immutable argument
//! structs and hands them to `workflow`, which owns all sequencing policy.
use clap::{Parser, Subcommand, ValueEnum};

/// Default pinned tag for the foundation framework clone.
pub const DEFAULT_FOUNDATION_VERSION: &str = "v29.0.0";

/// Default pinned tag for the seed module clone, kept in lockstep with the
/// tool release.
pub const DEFAULT_SEED_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "landzone",
    version,
    about = "Provision multi-stage cloud landing-zone environments",
    after_help = "Examples:\n  landzone configure --prefix demo1 --domain example.com \
                  --billing-account ABCDEF-123456 --group-owner lz-admins@example.com\n  \
                  landzone create data-cloud --region us-central1 --size small\n  \
                  landzone destroy data-cloud",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Configure(ConfigureArgs),
    #[command(visible_alias = "plant")]
    Create(SeedArgs),
    #[command(visible_alias = "burn")]
    Destroy(SeedArgs),
}

/// Configure command inputs: everything needed to mint (or rehydrate) the
/// environment descriptor and prepare stage working directories.
#[derive(Parser, Debug)]
#[command(about = "Initialize the environment configuration")]
pub struct ConfigureArgs {
    /// Prefix for uniquely named resources (max 9 characters)
    #[arg(long, short = 'p')]
    pub prefix: String,

    /// Cloud organization domain name
    #[arg(
        long,
        short = 'd',
        required_unless_present = "rehydrate",
        conflicts_with = "rehydrate",
        requires = "billing_account",
        requires = "group_owner"
    )]
    pub domain: Option<String>,

    /// Billing account ID
    #[arg(long, short = 'b')]
    pub billing_account: Option<String>,

    /// Name of the identity group that owns the environment
    #[arg(long, short = 'g')]
    pub group_owner: Option<String>,

    /// Multi-region location code for storage and datasets
    #[arg(long, short = 'l', default_value = "US")]
    pub location: String,

    /// Foundation framework version tag
    #[arg(long, value_name = "TAG", default_value = DEFAULT_FOUNDATION_VERSION)]
    pub foundation_version: String,

    /// Seed module version tag
    #[arg(long, value_name = "TAG", default_value = DEFAULT_SEED_VERSION)]
    pub seed_version: String,

    /// Restore a previously saved descriptor from the remote bucket
    #[arg(long)]
    pub rehydrate: bool,

    /// Internal use only
    #[arg(
        long,
        short = 'G',
        hide = true,
        requires = "org_admin_sa",
        conflicts_with = "rehydrate"
    )]
    pub internal: bool,

    /// Service account email of the internal environment administrator
    #[arg(long, hide = true)]
    pub org_admin_sa: Option<String>,

    /// Limit the environment to the foundation (no seed clone)
    #[arg(long, hide = true)]
    pub skip_seed: bool,
}

/// Inputs shared by `create` and `destroy` runs of a seed template.
#[derive(Parser, Debug)]
#[command(about = "Run the stage pipeline for a seed template")]
pub struct SeedArgs {
    /// Seed template to deploy
    #[arg(value_enum)]
    pub seed: SeedTemplate,

    /// Region for deployed resources
    #[arg(long, short = 'r', default_value = "us-central1")]
    pub region: String,

    /// Size class of the environment
    #[arg(long, short = 's', value_enum, default_value_t = SizeClass::Small)]
    pub size: SizeClass,

    /// Report plan feasibility for the bootstrap stage and stop
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the foundation stages entirely
    #[arg(long, hide = true)]
    pub skip_foundation: bool,

    /// Skip migrating state and vars to the remote backend
    #[arg(long, hide = true)]
    pub local_only: bool,

    /// Internal use only
    #[arg(long, short = 'G', hide = true)]
    pub internal: bool,

    /// Emit a verbose transcript of engine invocations
    #[arg(long)]
    pub verbose: bool,
}

/// Known seed templates. `Foundation` deploys the landing zone alone.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedTemplate {
    DataCloud,
    Foundation,
}

impl SeedTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            SeedTemplate::DataCloud => "data-cloud",
            SeedTemplate::Foundation => "foundation",
        }
    }

    /// Engine output holding the service endpoint surfaced after a
    /// successful seed apply, when the template exposes one.
    pub fn service_output(&self) -> Option<&'static str> {
        match self {
            SeedTemplate::DataCloud => Some("datafusion_endpoint"),
            SeedTemplate::Foundation => None,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Big,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Big => "big",
        }
    }
}
