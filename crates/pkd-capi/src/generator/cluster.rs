//! The CAPI Cluster object

use std::collections::BTreeMap;

use serde_json::json;

use crate::constants::{
    control_plane_name, CAPI_CLUSTER_API_VERSION, CAPI_CONTROLPLANE_API_VERSION, KIND_CLUSTER,
    KIND_KUBEADM_CONTROL_PLANE, KIND_PREPROVISIONED_CLUSTER, KONVOY_CLUSTER_NAME_LABEL,
    PREPROVISIONED_API_VERSION,
};
use crate::manifest::CAPIManifest;

use super::{object_ref, GenerationContext};

/// Labels the DKP addon controllers select preprovisioned clusters by
fn konvoy_cluster_labels(name: &str) -> BTreeMap<String, String> {
    [
        (KONVOY_CLUSTER_NAME_LABEL, name),
        ("konvoy.d2iq.io/cni", "calico"),
        ("konvoy.d2iq.io/csi", "local-volume-provisioner"),
        ("konvoy.d2iq.io/loadbalancer", "metallb"),
        ("konvoy.d2iq.io/osHint", ""),
        ("konvoy.d2iq.io/provider", "preprovisioned"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Generate the Cluster resource
///
/// The control-plane endpoint is left empty; the preprovisioned provider
/// fills it from the kube-vip address passed to the dry run.
pub fn generate_cluster(ctx: &GenerationContext) -> CAPIManifest {
    let name = ctx.name();
    let metadata = &ctx.spec.metadata;

    let spec = json!({
        "clusterNetwork": {
            "pods": { "cidrBlocks": [metadata.pod_subnet()] },
            "services": { "cidrBlocks": [metadata.service_subnet()] }
        },
        "controlPlaneEndpoint": { "host": "", "port": 0 },
        "controlPlaneRef": object_ref(
            CAPI_CONTROLPLANE_API_VERSION,
            KIND_KUBEADM_CONTROL_PLANE,
            &control_plane_name(name),
        ),
        "infrastructureRef": object_ref(
            PREPROVISIONED_API_VERSION,
            KIND_PREPROVISIONED_CLUSTER,
            name,
        ),
    });

    CAPIManifest::namespaced_default(CAPI_CLUSTER_API_VERSION, KIND_CLUSTER, name)
        .with_labels(konvoy_cluster_labels(name))
        .with_spec(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::demo_spec;
    use crate::overrides::OverrideSet;
    use crate::policy::DKP_2_6;

    fn cluster_for(spec: &pkd_common::ClusterSpec) -> CAPIManifest {
        let overrides = OverrideSet::default();
        generate_cluster(&GenerationContext {
            spec,
            policy: &DKP_2_6,
            overrides: &overrides,
        })
    }

    #[test]
    fn references_control_plane_and_infrastructure() {
        let cluster = cluster_for(&demo_spec());
        let spec = cluster.spec.unwrap();

        assert_eq!(cluster.metadata.name, "demo");
        assert_eq!(spec["controlPlaneRef"]["name"], "demo-control-plane");
        assert_eq!(spec["controlPlaneRef"]["kind"], "KubeadmControlPlane");
        assert_eq!(spec["infrastructureRef"]["kind"], "PreprovisionedCluster");
        assert_eq!(spec["infrastructureRef"]["namespace"], "default");
    }

    #[test]
    fn configured_subnets_are_used() {
        let mut spec = demo_spec();
        spec.metadata.podsubnet = "172.16.0.0/16".to_string();
        spec.metadata.servicesubnet = "10.100.0.0/16".to_string();
        let cluster = cluster_for(&spec).spec.unwrap();

        assert_eq!(cluster["clusterNetwork"]["pods"]["cidrBlocks"][0], "172.16.0.0/16");
        assert_eq!(
            cluster["clusterNetwork"]["services"]["cidrBlocks"][0],
            "10.100.0.0/16"
        );
    }

    #[test]
    fn unset_subnets_fall_back_to_defaults() {
        let mut spec = demo_spec();
        spec.metadata.podsubnet.clear();
        spec.metadata.servicesubnet.clear();
        let cluster = cluster_for(&spec).spec.unwrap();

        assert_eq!(cluster["clusterNetwork"]["pods"]["cidrBlocks"][0], "192.168.0.0/16");
        assert_eq!(cluster["clusterNetwork"]["services"]["cidrBlocks"][0], "10.96.0.0/12");
    }

    #[test]
    fn carries_konvoy_labels() {
        let labels = cluster_for(&demo_spec()).metadata.labels.unwrap();
        assert_eq!(labels[KONVOY_CLUSTER_NAME_LABEL], "demo");
        assert_eq!(labels["konvoy.d2iq.io/provider"], "preprovisioned");
        assert_eq!(labels["konvoy.d2iq.io/osHint"], "");
    }
}
