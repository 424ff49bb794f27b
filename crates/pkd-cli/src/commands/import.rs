//! `pkd import` - unpack an air-gap bundle on the disconnected side

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::{GlobalArgs, Result};

/// Unpack an air-gap bundle
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Bundle produced by `pkd airgap`
    pub bundle: PathBuf,

    /// Where to unpack (default: the work directory)
    #[arg(long)]
    pub dest: Option<PathBuf>,
}

pub async fn run(args: ImportArgs, global: &GlobalArgs) -> Result<()> {
    let dest = args.dest.unwrap_or_else(|| global.work_dir.clone());
    let files = pkd_bundle::unpack_file(&args.bundle, &dest)?;
    info!(
        bundle = %args.bundle.display(),
        dest = %dest.display(),
        files,
        "bundle unpacked"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn unpacks_into_the_work_dir_by_default() {
        let source = tempfile::tempdir().unwrap();
        let folder = source.path().join("demo");
        fs::create_dir_all(folder.join("kib/artifacts")).unwrap();
        fs::write(folder.join("cluster.yaml"), "metadata:\n  name: demo\n").unwrap();
        let bundle = source.path().join("AirGapBundle-dkp-v2.6.0.tar.gz");
        pkd_bundle::pack_to_file(&folder, &bundle).unwrap();

        let work = tempfile::tempdir().unwrap();
        run(
            ImportArgs {
                bundle,
                dest: None,
            },
            &GlobalArgs {
                config: PathBuf::from("cluster.yaml"),
                work_dir: work.path().to_path_buf(),
            },
        )
        .await
        .unwrap();

        assert!(work.path().join("demo/cluster.yaml").exists());
        assert!(work.path().join("demo/kib/artifacts").is_dir());
    }

    #[tokio::test]
    async fn unknown_archive_type_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let bundle = work.path().join("bundle.zip");
        fs::write(&bundle, b"PK").unwrap();

        let err = run(
            ImportArgs {
                bundle,
                dest: Some(work.path().to_path_buf()),
            },
            &GlobalArgs {
                config: PathBuf::from("cluster.yaml"),
                work_dir: work.path().to_path_buf(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            crate::Error::Bundle(pkd_bundle::Error::UnsupportedFormat { .. })
        ));
    }
}
