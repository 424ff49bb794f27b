//! Per-release generation policy
//!
//! DKP releases differ in a handful of details: the Kubernetes version they
//! ship, which node files and pre-kubeadm commands are needed, and a few
//! workarounds. [`VersionPolicy`] captures those differences as data so the
//! generators stay a single implementation.

use pkd_common::{Error, Result};

use crate::constants::CAPI_BOOTSTRAP_API_VERSION;

const AUDIT_POLICY: &str = include_str!("../assets/audit-policy.yaml");
const KUBE_PROXY_CONFIGURATION: &str = include_str!("../assets/konvoy-set-kube-proxy-configuration.sh");
const CONTAINERD_METRICS: &str = include_str!("../assets/konvoy-metrics.toml");
const RESTART_CONTAINERD_AND_WAIT: &str = include_str!("../assets/restart-containerd-and-wait.sh");
const INSTALL_CREDENTIAL_PROVIDERS: &str =
    include_str!("../assets/install-kubelet-credential-providers.sh");

/// Where a node file's content comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileContent {
    /// Literal content embedded in the bootstrap config
    Inline(&'static str),
    /// A key of the secret `<cluster>-<suffix>`
    Secret {
        /// Secret name suffix
        suffix: &'static str,
        /// Key within the secret
        key: &'static str,
    },
}

/// A file written to a node before kubeadm runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeFile {
    /// Absolute path on the node
    pub path: &'static str,
    /// POSIX permission string, e.g. "0700"
    pub permissions: &'static str,
    /// Owner, when it must be set explicitly
    pub owner: Option<&'static str>,
    /// File content
    pub content: FileContent,
}

impl NodeFile {
    const fn inline(path: &'static str, permissions: &'static str, content: &'static str) -> Self {
        Self {
            path,
            permissions,
            owner: None,
            content: FileContent::Inline(content),
        }
    }
}

/// What to do with a GPU pool when the install is air-gapped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AirGapGpu {
    /// The release cannot build NVIDIA images offline; fail the run
    Reject,
    /// GPU overrides work offline like online
    Supported,
}

const AUDIT_POLICY_FILE: NodeFile = NodeFile::inline(
    "/etc/kubernetes/audit-policy/apiserver-audit-policy.yaml",
    "0600",
    AUDIT_POLICY,
);

const KUBE_PROXY_CONFIGURATION_FILE: NodeFile = NodeFile::inline(
    "/run/kubeadm/konvoy-set-kube-proxy-configuration.sh",
    "0700",
    KUBE_PROXY_CONFIGURATION,
);

const CONTAINERD_METRICS_FILE: NodeFile = NodeFile::inline(
    "/etc/containerd/conf.d/konvoy-metrics.toml",
    "0644",
    CONTAINERD_METRICS,
);

const RESTART_CONTAINERD_FILE: NodeFile = NodeFile::inline(
    "/run/konvoy/restart-containerd-and-wait.sh",
    "0700",
    RESTART_CONTAINERD_AND_WAIT,
);

const CREDENTIAL_PROVIDERS_FILE: NodeFile = NodeFile::inline(
    "/run/konvoy/install-kubelet-credential-providers.sh",
    "0700",
    INSTALL_CREDENTIAL_PROVIDERS,
);

const ENCRYPTION_CONFIG_FILE: NodeFile = NodeFile {
    path: "/etc/kubernetes/pki/encryption-config.yaml",
    permissions: "0640",
    owner: Some("root:root"),
    content: FileContent::Secret {
        suffix: "etcd-encryption-config",
        key: "value",
    },
};

/// Generation settings for a family of DKP releases
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionPolicy {
    /// Short policy name used in logs
    pub name: &'static str,
    /// Kubernetes version of machines and the control plane
    pub kubernetes_version: &'static str,
    /// etcd image tag pinned in the cluster configuration
    pub etcd_image_tag: &'static str,
    /// apiVersion of the MachineDeployment's bootstrap configRef
    pub bootstrap_config_ref_api_version: &'static str,
    /// Replica count handed to the dry run when there is one control-plane host
    pub single_control_plane_placeholder: Option<u32>,
    /// Files written to control-plane nodes, in order
    pub control_plane_files: &'static [NodeFile],
    /// Commands run on control-plane nodes before kubeadm
    pub control_plane_pre_kubeadm: &'static [&'static str],
    /// Files written to worker nodes, in order
    pub worker_files: &'static [NodeFile],
    /// Commands run on worker nodes before kubeadm
    pub worker_pre_kubeadm: &'static [&'static str],
    /// GPU pools in air-gapped installs
    pub air_gap_gpu: AirGapGpu,
    /// containerd bundle prefix uploaded to hosts in air-gapped installs
    pub containerd_bundle: Option<&'static str>,
}

/// DKP 2.0 through 2.2
pub static DKP_2_2: VersionPolicy = VersionPolicy {
    name: "dkp-2.2",
    kubernetes_version: "v1.22.8",
    etcd_image_tag: "3.4.13-0",
    bootstrap_config_ref_api_version: "bootstrap.cluster.x-k8s.io/v1alpha4",
    single_control_plane_placeholder: Some(3),
    control_plane_files: &[
        AUDIT_POLICY_FILE,
        KUBE_PROXY_CONFIGURATION_FILE,
        CONTAINERD_METRICS_FILE,
        RESTART_CONTAINERD_FILE,
        ENCRYPTION_CONFIG_FILE,
    ],
    control_plane_pre_kubeadm: &[
        "systemctl daemon-reload",
        "/run/konvoy/restart-containerd-and-wait.sh",
        "/run/kubeadm/konvoy-set-kube-proxy-configuration.sh",
    ],
    worker_files: &[KUBE_PROXY_CONFIGURATION_FILE, CONTAINERD_METRICS_FILE],
    worker_pre_kubeadm: &[
        "systemctl daemon-reload",
        "systemctl restart containerd",
        "/run/kubeadm/konvoy-set-kube-proxy-configuration.sh",
    ],
    air_gap_gpu: AirGapGpu::Reject,
    containerd_bundle: Some("containerd-1.4.13-d2iq.1"),
};

/// DKP 2.3 and later
pub static DKP_2_6: VersionPolicy = VersionPolicy {
    name: "dkp-2.6",
    kubernetes_version: "v1.26.6",
    etcd_image_tag: "3.5.6-0",
    bootstrap_config_ref_api_version: CAPI_BOOTSTRAP_API_VERSION,
    single_control_plane_placeholder: None,
    control_plane_files: &[
        AUDIT_POLICY_FILE,
        KUBE_PROXY_CONFIGURATION_FILE,
        CONTAINERD_METRICS_FILE,
        RESTART_CONTAINERD_FILE,
        CREDENTIAL_PROVIDERS_FILE,
        ENCRYPTION_CONFIG_FILE,
    ],
    control_plane_pre_kubeadm: &[
        "systemctl daemon-reload",
        "/run/konvoy/restart-containerd-and-wait.sh",
        "/run/konvoy/install-kubelet-credential-providers.sh",
        "/run/kubeadm/konvoy-set-kube-proxy-configuration.sh",
    ],
    worker_files: &[
        KUBE_PROXY_CONFIGURATION_FILE,
        CONTAINERD_METRICS_FILE,
        RESTART_CONTAINERD_FILE,
        CREDENTIAL_PROVIDERS_FILE,
    ],
    worker_pre_kubeadm: &[
        "systemctl daemon-reload",
        "/run/konvoy/restart-containerd-and-wait.sh",
        "/run/konvoy/install-kubelet-credential-providers.sh",
        "/run/kubeadm/konvoy-set-kube-proxy-configuration.sh",
    ],
    air_gap_gpu: AirGapGpu::Supported,
    containerd_bundle: None,
};

impl VersionPolicy {
    /// Select the policy for a DKP version string such as `v2.2.2`
    pub fn for_dkp_version(version: &str) -> Result<&'static VersionPolicy> {
        let (major, minor) = parse_major_minor(version).ok_or_else(|| {
            Error::validation_for_field(
                pkd_common::error::UNKNOWN_CONTEXT,
                "metadata.dkpversion",
                format!("unrecognized DKP version {version:?}, expected vMAJOR.MINOR.PATCH"),
            )
        })?;

        match (major, minor) {
            (2, 0..=2) => Ok(&DKP_2_2),
            (2, _) => Ok(&DKP_2_6),
            _ => Err(Error::validation_for_field(
                pkd_common::error::UNKNOWN_CONTEXT,
                "metadata.dkpversion",
                format!("DKP {version} is not supported, only 2.x releases are"),
            )),
        }
    }

    /// Replicas passed to the dry run for a control plane of `hosts` nodes
    pub fn dry_run_control_plane_replicas(&self, hosts: usize) -> usize {
        match self.single_control_plane_placeholder {
            Some(placeholder) if hosts == 1 => placeholder as usize,
            _ => hosts,
        }
    }
}

fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("v2.2.2", "dkp-2.2")]
    #[case("v2.0.0", "dkp-2.2")]
    #[case("2.1.1", "dkp-2.2")]
    #[case("v2.3.0", "dkp-2.6")]
    #[case("v2.6.0", "dkp-2.6")]
    fn selects_policy_by_minor_version(#[case] version: &str, #[case] expected: &str) {
        assert_eq!(VersionPolicy::for_dkp_version(version).unwrap().name, expected);
    }

    #[rstest]
    #[case("")]
    #[case("latest")]
    #[case("v1.8.0")]
    #[case("v3.0.0")]
    fn rejects_unsupported_versions(#[case] version: &str) {
        let err = VersionPolicy::for_dkp_version(version).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn legacy_policy_uses_placeholder_for_single_control_plane() {
        assert_eq!(DKP_2_2.dry_run_control_plane_replicas(1), 3);
        assert_eq!(DKP_2_2.dry_run_control_plane_replicas(3), 3);
        assert_eq!(DKP_2_2.dry_run_control_plane_replicas(5), 5);
        assert_eq!(DKP_2_6.dry_run_control_plane_replicas(1), 1);
    }

    #[test]
    fn encryption_config_comes_from_secret() {
        for policy in [&DKP_2_2, &DKP_2_6] {
            let file = policy
                .control_plane_files
                .iter()
                .find(|f| f.path.ends_with("encryption-config.yaml"))
                .unwrap();
            assert!(matches!(file.content, FileContent::Secret { key: "value", .. }));
            assert_eq!(file.owner, Some("root:root"));
        }
    }

    #[test]
    fn every_pre_kubeadm_script_is_shipped_as_a_file() {
        for policy in [&DKP_2_2, &DKP_2_6] {
            for (files, commands) in [
                (policy.control_plane_files, policy.control_plane_pre_kubeadm),
                (policy.worker_files, policy.worker_pre_kubeadm),
            ] {
                for command in commands.iter().filter(|c| c.starts_with('/')) {
                    assert!(
                        files.iter().any(|f| f.path == *command),
                        "{} runs {command} without shipping it",
                        policy.name
                    );
                }
            }
        }
    }
}
