//! Command dispatch logic for gh-harvest

use super::{CommonArgs, InitArgs, harvest, init_config};
use crate::subjects::{MultiUser, Owner, OwnerKind, Repository};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "gh-harvest", author, version, long_about = None)]
#[command(about = "Harvest GitHub repository and account data into a single JSON tree")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: HarvestSubcommand,
}

#[derive(Subcommand, Debug)]
enum HarvestSubcommand {
    /// Harvest a repository
    Repo {
        /// Repository as OWNER/NAME
        #[arg(value_name = "OWNER/NAME")]
        slug: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Harvest a user and the repositories they own
    User {
        #[arg(value_name = "LOGIN")]
        login: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Harvest an organization and the repositories it owns
    Org {
        #[arg(value_name = "LOGIN")]
        login: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Harvest a repository owner without knowing whether it is a user or an organization
    Owner {
        #[arg(value_name = "LOGIN")]
        login: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Harvest several user profiles in one query
    Users {
        #[arg(value_name = "LOGIN", required = true)]
        logins: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Generate a default configuration file
    Init(InitArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    match Cli::parse_from(args).command {
        HarvestSubcommand::Repo { slug, common } => harvest(host, &common, &Repository::parse(&slug)?).await,
        HarvestSubcommand::User { login, common } => harvest(host, &common, &Owner::new(OwnerKind::User, login)).await,
        HarvestSubcommand::Org { login, common } => harvest(host, &common, &Owner::new(OwnerKind::Organization, login)).await,
        HarvestSubcommand::Owner { login, common } => harvest(host, &common, &Owner::new(OwnerKind::RepositoryOwner, login)).await,
        HarvestSubcommand::Users { logins, common } => harvest(host, &common, &MultiUser::new(logins)?).await,
        HarvestSubcommand::Init(init_args) => init_config(host, &init_args),
    }
}
