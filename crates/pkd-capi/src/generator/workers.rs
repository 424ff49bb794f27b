//! Worker pool objects: bootstrap template, machine deployment, machine template

use std::collections::BTreeMap;

use serde_json::json;

use pkd_common::spec::FLAG_GPU;

use crate::constants::{
    cluster_resource_name, CAPI_BOOTSTRAP_API_VERSION, CAPI_CLUSTER_API_VERSION,
    CLUSTER_NAME_LABEL, CRI_SOCKET, DEPLOYMENT_NAME_LABEL, GPU_REBOOT_COMMAND,
    KIND_KUBEADM_CONFIG_TEMPLATE, KIND_MACHINE_DEPLOYMENT, KIND_PREPROVISIONED_MACHINE_TEMPLATE,
    PREPROVISIONED_API_VERSION, VOLUME_PLUGIN_DIR,
};
use crate::manifest::CAPIManifest;

use super::{kubeadm_files, object_ref, GenerationContext};

/// Generate the KubeadmConfigTemplate for a worker pool
///
/// GPU pools reboot once after joining so the NVIDIA driver is loaded; the
/// reboot is always the last post-kubeadm command.
pub fn generate_kubeadm_config_template(ctx: &GenerationContext, pool: &str) -> CAPIManifest {
    let name = ctx.name();
    let policy = ctx.policy;

    let mut template_spec = json!({
        "files": kubeadm_files(name, policy.worker_files),
        "format": "cloud-config",
        "joinConfiguration": {
            "nodeRegistration": {
                "criSocket": CRI_SOCKET,
                "kubeletExtraArgs": {
                    "cloud-provider": "",
                    "volume-plugin-dir": VOLUME_PLUGIN_DIR,
                }
            }
        },
        "preKubeadmCommands": policy.worker_pre_kubeadm,
    });

    let gpu = ctx
        .spec
        .nodepools
        .get(pool)
        .is_some_and(|nodes| nodes.flag(FLAG_GPU));
    if gpu {
        template_spec["postKubeadmCommands"] = json!([GPU_REBOOT_COMMAND]);
    }

    CAPIManifest::namespaced_default(
        CAPI_BOOTSTRAP_API_VERSION,
        KIND_KUBEADM_CONFIG_TEMPLATE,
        cluster_resource_name(name, pool),
    )
    .with_spec(json!({ "template": { "spec": template_spec } }))
}

/// Generate the MachineDeployment for a worker pool
pub fn generate_machine_deployment(ctx: &GenerationContext, pool: &str) -> CAPIManifest {
    let name = ctx.name();
    let deployment = cluster_resource_name(name, pool);
    let replicas = ctx.spec.nodepools.get(pool).map_or(0, |nodes| nodes.size());

    let selector_labels = json!({
        CLUSTER_NAME_LABEL: name,
        DEPLOYMENT_NAME_LABEL: deployment,
    });

    let spec = json!({
        "clusterName": name,
        "minReadySeconds": 0,
        "progressDeadlineSeconds": 600,
        "replicas": replicas,
        "revisionHistoryLimit": 1,
        "selector": { "matchLabels": selector_labels },
        "strategy": {
            "rollingUpdate": { "maxSurge": 1, "maxUnavailable": 0 },
            "type": "RollingUpdate",
        },
        "template": {
            "metadata": { "labels": selector_labels },
            "spec": {
                "bootstrap": {
                    "configRef": object_ref(
                        ctx.policy.bootstrap_config_ref_api_version,
                        KIND_KUBEADM_CONFIG_TEMPLATE,
                        &deployment,
                    )
                },
                "clusterName": name,
                "infrastructureRef": object_ref(
                    PREPROVISIONED_API_VERSION,
                    KIND_PREPROVISIONED_MACHINE_TEMPLATE,
                    &deployment,
                ),
                "version": ctx.policy.kubernetes_version,
            }
        }
    });

    CAPIManifest::namespaced_default(CAPI_CLUSTER_API_VERSION, KIND_MACHINE_DEPLOYMENT, &deployment)
        .with_labels(BTreeMap::from([(
            CLUSTER_NAME_LABEL.to_string(),
            name.to_string(),
        )]))
        .with_spec(spec)
}

/// Generate the PreprovisionedMachineTemplate for a worker pool
pub fn generate_pool_machine_template(ctx: &GenerationContext, pool: &str) -> CAPIManifest {
    preprovisioned_machine_template(
        &cluster_resource_name(ctx.name(), pool),
        ctx.override_for(pool),
    )
}

/// Machine template pointing at the inventory of the same name
///
/// `overrideRef` is only present when the scope has an override; an empty
/// reference would make the provider look for a secret that never exists.
pub(super) fn preprovisioned_machine_template(
    name: &str,
    override_name: Option<&str>,
) -> CAPIManifest {
    let mut template_spec = json!({
        "inventoryRef": {
            "name": name,
            "namespace": pkd_common::DEFAULT_NAMESPACE,
        }
    });
    if let Some(override_name) = override_name {
        template_spec["overrideRef"] = json!({ "name": override_name });
    }

    CAPIManifest::namespaced_default(
        PREPROVISIONED_API_VERSION,
        KIND_PREPROVISIONED_MACHINE_TEMPLATE,
        name,
    )
    .with_spec(json!({ "template": { "spec": template_spec } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::{demo_spec, pool};
    use crate::overrides::OverrideSet;
    use crate::policy::{VersionPolicy, DKP_2_2, DKP_2_6};
    use pkd_common::ClusterSpec;

    fn with_ctx<T>(
        spec: &ClusterSpec,
        policy: &VersionPolicy,
        f: impl FnOnce(&GenerationContext) -> T,
    ) -> T {
        let overrides = OverrideSet::resolve(spec, policy).unwrap();
        f(&GenerationContext {
            spec,
            policy,
            overrides: &overrides,
        })
    }

    mod machine_deployment {
        use super::*;

        #[test]
        fn replicas_match_pool_size() {
            let md = with_ctx(&demo_spec(), &DKP_2_6, |ctx| {
                generate_machine_deployment(ctx, "md-0")
            });
            let spec = md.spec.unwrap();

            assert_eq!(md.metadata.name, "demo-md-0");
            assert_eq!(spec["replicas"], 2);
            assert_eq!(spec["clusterName"], "demo");
            assert_eq!(
                spec["selector"]["matchLabels"][DEPLOYMENT_NAME_LABEL],
                "demo-md-0"
            );
            assert_eq!(
                spec["template"]["metadata"]["labels"][CLUSTER_NAME_LABEL],
                "demo"
            );
        }

        #[test]
        fn references_template_and_bootstrap_of_same_name() {
            let md = with_ctx(&demo_spec(), &DKP_2_6, |ctx| {
                generate_machine_deployment(ctx, "md-0")
            });
            let spec = md.spec.unwrap();
            let template = &spec["template"]["spec"];

            assert_eq!(template["infrastructureRef"]["name"], "demo-md-0");
            assert_eq!(template["bootstrap"]["configRef"]["name"], "demo-md-0");
            assert_eq!(
                template["bootstrap"]["configRef"]["apiVersion"],
                CAPI_BOOTSTRAP_API_VERSION
            );
        }

        #[test]
        fn legacy_policy_uses_v1alpha4_bootstrap_ref() {
            let md = with_ctx(&demo_spec(), &DKP_2_2, |ctx| {
                generate_machine_deployment(ctx, "md-0")
            });
            let spec = md.spec.unwrap();
            let template = &spec["template"]["spec"];
            assert_eq!(
                template["bootstrap"]["configRef"]["apiVersion"],
                "bootstrap.cluster.x-k8s.io/v1alpha4"
            );
            assert_eq!(template["version"], "v1.22.8");
        }
    }

    mod config_template {
        use super::*;

        #[test]
        fn plain_pool_has_no_post_kubeadm_commands() {
            let kct = with_ctx(&demo_spec(), &DKP_2_6, |ctx| {
                generate_kubeadm_config_template(ctx, "md-0")
            });
            let spec = kct.spec.unwrap();
            assert!(spec["template"]["spec"].get("postKubeadmCommands").is_none());
            assert_eq!(
                spec["template"]["spec"]["preKubeadmCommands"]
                    .as_array()
                    .unwrap()
                    .len(),
                DKP_2_6.worker_pre_kubeadm.len()
            );
        }

        #[test]
        fn gpu_pool_reboot_is_last_post_kubeadm_command() {
            let mut spec = demo_spec();
            spec.nodepools
                .insert("gpu".to_string(), pool(&[("g1", "10.0.0.30")], false, true));
            let kct = with_ctx(&spec, &DKP_2_6, |ctx| {
                generate_kubeadm_config_template(ctx, "gpu")
            });
            let body = kct.spec.unwrap();
            let post = body["template"]["spec"]["postKubeadmCommands"]
                .as_array()
                .unwrap();
            assert_eq!(post.last().unwrap(), GPU_REBOOT_COMMAND);
        }

        #[test]
        fn worker_files_follow_policy() {
            let kct = with_ctx(&demo_spec(), &DKP_2_2, |ctx| {
                generate_kubeadm_config_template(ctx, "md-0")
            });
            let spec = kct.spec.unwrap();
            let paths: Vec<&str> = spec["template"]["spec"]["files"]
                .as_array()
                .unwrap()
                .iter()
                .map(|f| f["path"].as_str().unwrap())
                .collect();
            assert_eq!(
                paths,
                vec![
                    "/run/kubeadm/konvoy-set-kube-proxy-configuration.sh",
                    "/etc/containerd/conf.d/konvoy-metrics.toml"
                ]
            );
        }
    }

    mod machine_template {
        use super::*;

        #[test]
        fn registry_pool_references_registry_override() {
            let pmt = with_ctx(&demo_spec(), &DKP_2_6, |ctx| {
                generate_pool_machine_template(ctx, "md-0")
            });
            let spec = pmt.spec.unwrap();
            assert_eq!(
                spec["template"]["spec"]["overrideRef"]["name"],
                "demo-registry-override"
            );
            assert_eq!(spec["template"]["spec"]["inventoryRef"]["name"], "demo-md-0");
        }

        #[test]
        fn unflagged_pool_has_no_override_ref() {
            let mut spec = demo_spec();
            spec.nodepools
                .insert("plain".to_string(), pool(&[("p1", "10.0.0.40")], false, false));
            let pmt = with_ctx(&spec, &DKP_2_6, |ctx| {
                generate_pool_machine_template(ctx, "plain")
            });
            let body = pmt.spec.unwrap();
            assert!(body["template"]["spec"].get("overrideRef").is_none());
        }
    }
}
