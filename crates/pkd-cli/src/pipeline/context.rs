//! Everything a provisioning run needs, resolved once up front

use std::path::{Path, PathBuf};

use pkd_capi::{GenerationContext, ManifestSet, OverrideSet, VersionPolicy};
use pkd_common::ClusterSpec;
use tracing::info;

use crate::Result;

/// Directory layout of a work directory
///
/// External commands run with `root` as their working directory, so every
/// path handed to them is relative to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub const RESOURCES: &'static str = "resources";
    pub const OVERRIDES: &'static str = "overrides";
    pub const KIB: &'static str = "kib";
    pub const DKP_BINARIES: &'static str = "dkpBinaries";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resources(&self) -> PathBuf {
        self.root.join(Self::RESOURCES)
    }

    pub fn overrides(&self) -> PathBuf {
        self.root.join(Self::OVERRIDES)
    }

    pub fn kib(&self) -> PathBuf {
        self.root.join(Self::KIB)
    }

    /// Versioned dkp binary shipped next to cluster.yaml
    pub fn dkp_source(&self, dkp_version: &str) -> PathBuf {
        self.root
            .join(Self::DKP_BINARIES)
            .join(format!("dkp_{dkp_version}_linux_amd64"))
            .join("dkp")
    }

    /// The copy every `./dkp` invocation runs
    pub fn dkp(&self) -> PathBuf {
        self.root.join("dkp")
    }

    /// Raw `dkp create cluster --dry-run` output
    pub fn dry_run_file(&self, cluster: &str) -> PathBuf {
        self.root.join(format!("{cluster}.yaml"))
    }

    /// Admin kubeconfig of the new cluster
    pub fn kubeconfig_file(&self, cluster: &str) -> PathBuf {
        self.root.join(format!("{cluster}.conf"))
    }
}

/// Resolved state for one run
///
/// Built before any external command runs, so configuration and generation
/// errors surface before anything is mutated.
#[derive(Debug)]
pub struct RuntimeContext {
    pub spec: ClusterSpec,
    pub policy: &'static VersionPolicy,
    pub workspace: Workspace,
    pub overrides: OverrideSet,
    pub manifests: ManifestSet,
    /// Kubeconfig the new cluster is merged into, `~/.kube/config` when unset
    pub kubeconfig_target: Option<PathBuf>,
}

impl RuntimeContext {
    pub fn new(
        spec: ClusterSpec,
        work_dir: &Path,
        kubeconfig_target: Option<PathBuf>,
    ) -> Result<Self> {
        pkd_capi::validate(&spec)?;
        spec.airgap.validate(spec.name())?;
        let policy = VersionPolicy::for_dkp_version(&spec.metadata.dkpversion)?;
        let overrides = OverrideSet::resolve(&spec, policy)?;
        let manifests = pkd_capi::generate(&GenerationContext {
            spec: &spec,
            policy,
            overrides: &overrides,
        })?;

        info!(
            cluster = %spec.name(),
            dkp = %spec.metadata.dkpversion,
            policy = policy.name,
            air_gapped = spec.airgap.enabled,
            "runtime context ready"
        );

        Ok(Self {
            spec,
            policy,
            workspace: Workspace::new(work_dir),
            overrides,
            manifests,
            kubeconfig_target,
        })
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// DKP version without the leading `v`, as `dkp version` prints it
    pub fn dkp_version_number(&self) -> &str {
        self.spec.metadata.dkpversion.trim_start_matches('v')
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub const DEMO_CLUSTER: &str = r#"
metadata:
  name: demo
  sshuser: centos
  sshprivatekey: id_rsa
  interfacename: ens192
  loadbalancer: 10.0.0.5
  metallbaddressrange: 10.0.0.100-10.0.0.120
  kibtimeout: 45
  pivottimeout: "25"
  dkpversion: v2.6.0
  kibversion: v2.8.6
registry:
  host: https://harbor.example.com/registry
  username: admin
  password: hunter2
controlplane:
  hosts:
    cp1: 10.0.0.10
nodepools:
  md-0:
    hosts:
      worker1: 10.0.0.14
      worker2: 10.0.0.15
    flags:
      registry: true
"#;

    pub fn demo_spec() -> ClusterSpec {
        ClusterSpec::from_yaml(DEMO_CLUSTER).unwrap()
    }

    pub fn air_gapped_spec() -> ClusterSpec {
        let mut spec = demo_spec();
        spec.airgap.enabled = true;
        spec.airgap.osversion = "rhel_8_x86_64".to_string();
        spec.airgap.k8sversion = "1.25.4".to_string();
        spec.airgap.containerdversion = "rhel-8.6-x86_64".to_string();
        spec
    }

    pub fn context(spec: ClusterSpec, root: &Path) -> RuntimeContext {
        RuntimeContext::new(spec, root, Some(root.join(".kube/config"))).unwrap()
    }
}
