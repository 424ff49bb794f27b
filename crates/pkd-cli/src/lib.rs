//! pkd CLI library

pub mod commands;
pub mod download;
pub mod error;
pub mod kubeconfig;
pub mod pipeline;
pub mod runner;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// pkd - Provision DKP preprovisioned Kubernetes clusters from a single cluster.yaml
#[derive(Parser, Debug)]
#[command(name = "pkd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Cluster definition, relative to the work directory
    #[arg(long, global = true, env = "PKD_CONFIG", default_value = "cluster.yaml")]
    pub config: PathBuf,

    /// Directory holding cluster.yaml, binaries and generated files
    #[arg(long, global = true, env = "PKD_WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample cluster.yaml
    Init(commands::init::InitArgs),
    /// Generate inventories, manifests and overrides without touching any cluster
    Generate(commands::generate::GenerateArgs),
    /// Provision the cluster described by cluster.yaml
    Up(commands::up::UpArgs),
    /// Download everything an air-gapped install needs and pack it into a bundle
    Airgap(commands::airgap::AirgapArgs),
    /// Unpack an air-gap bundle
    Import(commands::import::ImportArgs),
    /// Print the pkd and dkp versions
    Version(commands::version::VersionArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let global = self.global;
        match self.command {
            Commands::Init(args) => commands::init::run(args, &global).await,
            Commands::Generate(args) => commands::generate::run(args, &global).await,
            Commands::Up(args) => commands::up::run(args, &global).await,
            Commands::Airgap(args) => commands::airgap::run(args, &global).await,
            Commands::Import(args) => commands::import::run(args, &global).await,
            Commands::Version(args) => commands::version::run(args, &global).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "pkd",
            "up",
            "--config",
            "prod.yaml",
            "--work-dir",
            "/srv/prod",
        ])
        .unwrap();
        assert_eq!(cli.global.config, PathBuf::from("prod.yaml"));
        assert_eq!(cli.global.work_dir, PathBuf::from("/srv/prod"));
    }

    #[test]
    fn yee_haw_is_an_alias_for_pause() {
        let cli = Cli::try_parse_from(["pkd", "up", "--yee-haw"]).unwrap();
        match cli.command {
            Commands::Up(args) => assert!(args.pause),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
