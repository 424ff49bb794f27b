//! `pkd init` - write a sample cluster.yaml to start from

use std::fs;

use clap::Args;
use pkd_common::ClusterSpec;
use tracing::info;

use super::config_path;
use crate::{Error, GlobalArgs, Result};

/// Write a sample cluster.yaml
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Sample an air-gapped install instead of an online one
    #[arg(long)]
    pub air_gap: bool,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub async fn run(args: InitArgs, global: &GlobalArgs) -> Result<()> {
    let path = config_path(&global.work_dir, &global.config);
    if path.exists() && !args.force {
        return Err(Error::validation(format!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        )));
    }

    let yaml = ClusterSpec::sample(args.air_gap).to_yaml()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, yaml)?;

    info!(path = %path.display(), air_gapped = args.air_gap, "wrote sample cluster definition");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn global(dir: &std::path::Path) -> GlobalArgs {
        GlobalArgs {
            config: PathBuf::from("cluster.yaml"),
            work_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn sample_loads_back_and_passes_validation() {
        let dir = tempfile::tempdir().unwrap();
        run(
            InitArgs {
                air_gap: true,
                force: false,
            },
            &global(dir.path()),
        )
        .await
        .unwrap();

        let spec = ClusterSpec::load(dir.path().join("cluster.yaml")).unwrap();
        assert!(spec.airgap.enabled);
        pkd_capi::validate(&spec).unwrap();
        spec.airgap.validate(spec.name()).unwrap();
    }

    #[tokio::test]
    async fn existing_file_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cluster.yaml"), "metadata: {}\n").unwrap();

        let err = run(
            InitArgs {
                air_gap: false,
                force: false,
            },
            &global(dir.path()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        run(
            InitArgs {
                air_gap: false,
                force: true,
            },
            &global(dir.path()),
        )
        .await
        .unwrap();
        let spec = ClusterSpec::load(dir.path().join("cluster.yaml")).unwrap();
        assert!(!spec.airgap.enabled);
    }
}
