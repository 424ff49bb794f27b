//! `pkd airgap` - collect everything a disconnected install needs
//!
//! Downloads the dkp and konvoy-image-builder releases, the OS, pip and
//! Kubernetes image artifacts, and the image bundles into a folder named after
//! the cluster, then packs that folder into `AirGapBundle-dkp-<version>.tar.gz`.
//! On the disconnected side `pkd import` unpacks it and `pkd up` runs from the
//! unpacked folder.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use pkd_capi::VersionPolicy;
use pkd_common::ClusterSpec;
use tracing::info;

use super::{config_path, load_spec};
use crate::download::{Downloader, ReqwestDownloader};
use crate::{Error, GlobalArgs, Result};

const D2IQ_DOWNLOADS: &str = "https://downloads.d2iq.com/dkp";
const D2IQ_PACKAGES: &str = "https://packages.d2iq.com/dkp";
const KIB_RELEASES: &str = "https://github.com/mesosphere/konvoy-image-builder/releases/download";
const PKD_RELEASES: &str = "https://github.com/MooseOnTehLoose/pkd/releases/download";

/// Release of this binary, used to fetch a matching pkd for the bundle
pub const PKD_RELEASE: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Download an air-gap bundle
#[derive(Args, Debug)]
pub struct AirgapArgs {
    /// pkd release to include when airgap.includepkd is set
    #[arg(long, default_value = PKD_RELEASE)]
    pub pkd_release: String,
}

/// One file to fetch into the bundle folder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    /// Where to save it, relative to the bundle folder
    pub path: PathBuf,
    /// Extract into this folder (relative to the bundle folder) after download
    pub extract_to: Option<PathBuf>,
    /// Delete the downloaded file once extracted
    pub remove_after: bool,
}

impl Artifact {
    fn save(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            extract_to: None,
            remove_after: false,
        }
    }

    fn extract_into(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_to = Some(dir.into());
        self
    }

    fn then_remove(mut self) -> Self {
        self.remove_after = true;
        self
    }
}

/// `AirGapBundle-dkp-<version>.tar.gz`
pub fn bundle_file_name(dkp_version: &str) -> String {
    format!("AirGapBundle-dkp-{dkp_version}.tar.gz")
}

/// Every download for an air-gap bundle, in order
pub fn download_plan(
    spec: &ClusterSpec,
    policy: &VersionPolicy,
    pkd_release: &str,
) -> Result<Vec<Artifact>> {
    let meta = &spec.metadata;
    let airgap = &spec.airgap;
    for (field, value) in [
        ("metadata.dkpversion", &meta.dkpversion),
        ("metadata.kibversion", &meta.kibversion),
        ("airgap.osversion", &airgap.osversion),
        ("airgap.k8sversion", &airgap.k8sversion),
        ("airgap.containerdversion", &airgap.containerdversion),
    ] {
        if value.trim().is_empty() {
            return Err(pkd_common::Error::validation_for_field(
                spec.name(),
                field,
                "required to build an air-gap bundle",
            )
            .into());
        }
    }

    let dkp = &meta.dkpversion;
    let kib = &meta.kibversion;
    let k8s = &airgap.k8sversion;
    let os = &airgap.osversion;
    let mut plan = Vec::new();

    if airgap.includepkd {
        let (asset, saved_as) = match airgap.pkdos.as_str() {
            "windows" => ("pkd.exe", "pkd.exe"),
            "macos" => ("pkd-darwin-amd64", "pkd"),
            "linux" => ("pkd-linux-amd64", "pkd"),
            other => {
                return Err(pkd_common::Error::validation_for_field(
                    spec.name(),
                    "airgap.pkdos",
                    format!("{other:?} is not one of linux, macos, windows"),
                )
                .into())
            }
        };
        plan.push(Artifact::save(
            format!("{PKD_RELEASES}/{pkd_release}/{asset}"),
            saved_as,
        ));
    }

    let dkp_release = format!("dkp_{dkp}_linux_amd64.tar.gz");
    plan.push(
        Artifact::save(format!("{D2IQ_DOWNLOADS}/{dkp}/{dkp_release}"), &dkp_release)
            .extract_into(""),
    );

    let kib_release = format!("konvoy-image-bundle-{kib}_linux_amd64.tar.gz");
    plan.push(
        Artifact::save(format!("{KIB_RELEASES}/{kib}/{kib_release}"), kib_release)
            .extract_into("kib")
            .then_remove(),
    );

    let bootstrap_image = format!("konvoy-bootstrap_{dkp}.tar");
    plan.push(Artifact::save(
        format!("{D2IQ_DOWNLOADS}/{dkp}/{bootstrap_image}"),
        bootstrap_image,
    ));

    let os_packages = format!("{k8s}_{os}.tar.gz");
    plan.push(Artifact::save(
        format!("{D2IQ_DOWNLOADS}/airgapped/os-packages/{os_packages}"),
        format!("kib/artifacts/{os_packages}"),
    ));
    let images = format!("{k8s}_images.tar.gz");
    plan.push(Artifact::save(
        format!("{D2IQ_DOWNLOADS}/airgapped/kubernetes-images/{images}"),
        format!("kib/artifacts/images/{images}"),
    ));
    plan.push(Artifact::save(
        format!("{D2IQ_DOWNLOADS}/airgapped/pip-packages/pip-packages.tar.gz"),
        "kib/artifacts/pip-packages.tar.gz",
    ));

    if let Some(bundle) = policy.containerd_bundle {
        let containerd = format!("{bundle}-{}.tar.gz", airgap.containerdversion);
        plan.push(Artifact::save(
            format!("{D2IQ_PACKAGES}/containerd/{containerd}"),
            format!("kib/artifacts/{containerd}"),
        ));
    }

    plan.push(Artifact::save(
        format!("{D2IQ_DOWNLOADS}/{dkp}/konvoy_image_bundle_{dkp}_linux_amd64.tar.gz"),
        "konvoy-image-bundle.tar.gz",
    ));
    // Published with a .tar.gz name but not compressed
    plan.push(
        Artifact::save(
            format!("{D2IQ_DOWNLOADS}/{dkp}/kommander-image-bundle-{dkp}.tar.gz"),
            "archived-kommander-image-bundle.tar",
        )
        .extract_into("")
        .then_remove(),
    );
    plan.push(Artifact::save(
        format!("{D2IQ_DOWNLOADS}/{dkp}/kommander-applications-{dkp}.tar.gz"),
        format!("kommander-applications-{dkp}.tar.gz"),
    ));
    for bundle in ["dkp-kommander-charts-bundle", "dkp-insights-image-bundle"] {
        plan.push(
            Artifact::save(
                format!("{D2IQ_DOWNLOADS}/{dkp}/{bundle}-{dkp}.tar.gz"),
                format!("{bundle}-{dkp}.tar"),
            )
            .extract_into("")
            .then_remove(),
        );
    }

    Ok(plan)
}

/// Download every artifact into `folder`, extracting as planned
pub async fn fetch_all(
    downloader: &dyn Downloader,
    folder: &Path,
    artifacts: &[Artifact],
) -> Result<()> {
    for (index, artifact) in artifacts.iter().enumerate() {
        let dest = folder.join(&artifact.path);
        info!(
            "[download {}/{}] {}",
            index + 1,
            artifacts.len(),
            artifact.path.display()
        );
        downloader.download(&artifact.url, &dest).await?;

        if let Some(into) = &artifact.extract_to {
            pkd_bundle::extract_file(&dest, &folder.join(into))?;
        }
        if artifact.remove_after {
            fs::remove_file(&dest)?;
        }
    }
    Ok(())
}

pub async fn run(args: AirgapArgs, global: &GlobalArgs) -> Result<()> {
    let spec = load_spec(&global.work_dir, &global.config)?;
    let policy = VersionPolicy::for_dkp_version(&spec.metadata.dkpversion)?;
    let plan = download_plan(&spec, policy, &args.pkd_release)?;

    let folder = global.work_dir.join(spec.name());
    fs::create_dir_all(folder.join("kib/artifacts/images"))?;
    if spec.airgap.includepkd {
        let source = config_path(&global.work_dir, &global.config);
        fs::copy(&source, folder.join("cluster.yaml")).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to copy {}: {e}", source.display()),
            ))
        })?;
    }

    fetch_all(&ReqwestDownloader::new(), &folder, &plan).await?;

    let bundle = global
        .work_dir
        .join(bundle_file_name(&spec.metadata.dkpversion));
    pkd_bundle::pack_to_file(&folder, &bundle)?;
    println!("AirGap Bundle now available: {}", bundle.display());
    Ok(())
}
