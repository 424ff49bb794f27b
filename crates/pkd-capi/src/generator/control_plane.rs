//! KubeadmControlPlane and the control-plane machine template

use serde_json::{json, Value};

use pkd_common::spec::FLAG_GPU;

use crate::constants::{
    control_plane_name, CAPI_CONTROLPLANE_API_VERSION, CRI_SOCKET, GPU_REBOOT_COMMAND,
    KIND_KUBEADM_CONTROL_PLANE, KIND_PREPROVISIONED_MACHINE_TEMPLATE, PREPROVISIONED_API_VERSION,
    PROVIDER_ID_TEMPLATE, VOLUME_PLUGIN_DIR,
};
use crate::manifest::CAPIManifest;

use super::workers::preprovisioned_machine_template;
use super::{kubeadm_files, object_ref, GenerationContext};

const AUDIT_POLICY_DIR: &str = "/etc/kubernetes/audit-policy/";

fn node_registration() -> Value {
    json!({
        "criSocket": CRI_SOCKET,
        "kubeletExtraArgs": {
            "cloud-provider": "",
            "provider-id": PROVIDER_ID_TEMPLATE,
            "volume-plugin-dir": VOLUME_PLUGIN_DIR,
        }
    })
}

/// Generate the KubeadmControlPlane
///
/// Replicas always match the control-plane host count. Single-node control
/// planes have no rollout strategy since there is nothing to surge into.
pub fn generate_kubeadm_control_plane(ctx: &GenerationContext) -> CAPIManifest {
    let name = ctx.name();
    let policy = ctx.policy;
    let replicas = ctx.spec.controlplane.size();

    let mut kubeadm_config_spec = json!({
        "clusterConfiguration": {
            "apiServer": {
                "extraArgs": {
                    "audit-log-maxage": "30",
                    "audit-log-maxbackup": "10",
                    "audit-log-maxsize": "100",
                    "audit-log-path": "/var/log/audit/kube-apiserver-audit.log",
                    "audit-policy-file": "/etc/kubernetes/audit-policy/apiserver-audit-policy.yaml",
                    "cloud-provider": "",
                    "encryption-provider-config": "/etc/kubernetes/pki/encryption-config.yaml",
                },
                "extraVolumes": [
                    {
                        "hostPath": AUDIT_POLICY_DIR,
                        "mountPath": AUDIT_POLICY_DIR,
                        "name": "audit-policy",
                    },
                    {
                        "hostPath": "/var/log/kubernetes/audit",
                        "mountPath": "/var/log/audit/",
                        "name": "audit-logs",
                    }
                ]
            },
            "controllerManager": {
                "extraArgs": {
                    "cloud-provider": "",
                    "flex-volume-plugin-dir": VOLUME_PLUGIN_DIR,
                }
            },
            "dns": {},
            "etcd": { "local": { "imageTag": policy.etcd_image_tag } },
            "networking": {},
            "scheduler": {}
        },
        "files": kubeadm_files(name, policy.control_plane_files),
        "format": "cloud-config",
        "initConfiguration": { "nodeRegistration": node_registration() },
        "joinConfiguration": { "nodeRegistration": node_registration() },
        "preKubeadmCommands": policy.control_plane_pre_kubeadm,
    });

    if ctx.spec.controlplane.flag(FLAG_GPU) {
        kubeadm_config_spec["postKubeadmCommands"] = json!([GPU_REBOOT_COMMAND]);
    }

    let mut spec = json!({
        "kubeadmConfigSpec": kubeadm_config_spec,
        "machineTemplate": {
            "infrastructureRef": object_ref(
                PREPROVISIONED_API_VERSION,
                KIND_PREPROVISIONED_MACHINE_TEMPLATE,
                &control_plane_name(name),
            )
        },
        "replicas": replicas,
        "version": policy.kubernetes_version,
    });

    if replicas > 1 {
        spec["rolloutStrategy"] = json!({
            "rollingUpdate": { "maxSurge": 0 },
            "type": "RollingUpdate",
        });
    }

    CAPIManifest::namespaced_default(
        CAPI_CONTROLPLANE_API_VERSION,
        KIND_KUBEADM_CONTROL_PLANE,
        control_plane_name(name),
    )
    .with_spec(spec)
}

/// Generate the control plane's PreprovisionedMachineTemplate
pub fn generate_control_plane_machine_template(ctx: &GenerationContext) -> CAPIManifest {
    preprovisioned_machine_template(
        &control_plane_name(ctx.name()),
        ctx.override_for("control-plane"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::{demo_spec, pool};
    use crate::overrides::OverrideSet;
    use crate::policy::{VersionPolicy, DKP_2_2, DKP_2_6};

    fn kcp(spec: &pkd_common::ClusterSpec, policy: &VersionPolicy) -> Value {
        let overrides = OverrideSet::resolve(spec, policy).unwrap();
        generate_kubeadm_control_plane(&GenerationContext {
            spec,
            policy,
            overrides: &overrides,
        })
        .spec
        .unwrap()
    }

    #[test]
    fn single_host_has_one_replica_and_no_rollout_strategy() {
        let spec = kcp(&demo_spec(), &DKP_2_2);
        assert_eq!(spec["replicas"], 1);
        assert!(spec.get("rolloutStrategy").is_none());
    }

    #[test]
    fn replicas_match_host_count() {
        let mut cluster = demo_spec();
        cluster.controlplane = pool(
            &[("cp1", "10.0.0.11"), ("cp2", "10.0.0.12"), ("cp3", "10.0.0.13")],
            false,
            false,
        );
        let spec = kcp(&cluster, &DKP_2_6);

        assert_eq!(spec["replicas"], 3);
        assert_eq!(spec["rolloutStrategy"]["rollingUpdate"]["maxSurge"], 0);
        assert_eq!(spec["rolloutStrategy"]["type"], "RollingUpdate");
    }

    #[test]
    fn policy_selects_versions_and_scripts() {
        let legacy = kcp(&demo_spec(), &DKP_2_2);
        let current = kcp(&demo_spec(), &DKP_2_6);

        assert_eq!(legacy["version"], "v1.22.8");
        assert_eq!(
            legacy["kubeadmConfigSpec"]["clusterConfiguration"]["etcd"]["local"]["imageTag"],
            "3.4.13-0"
        );
        assert_eq!(current["version"], DKP_2_6.kubernetes_version);

        let legacy_files = legacy["kubeadmConfigSpec"]["files"].as_array().unwrap().len();
        let current_files = current["kubeadmConfigSpec"]["files"].as_array().unwrap().len();
        assert_eq!(legacy_files, DKP_2_2.control_plane_files.len());
        assert_eq!(current_files, DKP_2_6.control_plane_files.len());
        assert!(current["kubeadmConfigSpec"]["preKubeadmCommands"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c == "/run/konvoy/install-kubelet-credential-providers.sh"));
    }

    #[test]
    fn join_and_init_register_with_containerd() {
        let spec = kcp(&demo_spec(), &DKP_2_6);
        for phase in ["initConfiguration", "joinConfiguration"] {
            let registration = &spec["kubeadmConfigSpec"][phase]["nodeRegistration"];
            assert_eq!(registration["criSocket"], CRI_SOCKET);
            assert_eq!(registration["kubeletExtraArgs"]["provider-id"], PROVIDER_ID_TEMPLATE);
        }
    }

    #[test]
    fn gpu_control_plane_reboots_after_join() {
        let mut cluster = demo_spec();
        cluster.controlplane = pool(&[("cp1", "10.0.0.11")], false, true);
        let spec = kcp(&cluster, &DKP_2_6);
        let post = spec["kubeadmConfigSpec"]["postKubeadmCommands"]
            .as_array()
            .unwrap();
        assert_eq!(post.last().unwrap(), GPU_REBOOT_COMMAND);
    }

    #[test]
    fn control_plane_template_references_its_override() {
        let mut cluster = demo_spec();
        cluster.controlplane.flags.insert("registry".to_string(), true);
        let overrides = OverrideSet::resolve(&cluster, &DKP_2_6).unwrap();
        let template = generate_control_plane_machine_template(&GenerationContext {
            spec: &cluster,
            policy: &DKP_2_6,
            overrides: &overrides,
        });
        let spec = template.spec.unwrap();

        assert_eq!(template.metadata.name, "demo-control-plane");
        assert_eq!(
            spec["template"]["spec"]["overrideRef"]["name"],
            "demo-registry-override"
        );
        assert_eq!(
            spec["template"]["spec"]["inventoryRef"]["name"],
            "demo-control-plane"
        );
    }
}
