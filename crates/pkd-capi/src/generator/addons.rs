//! CNI and load-balancer ConfigMaps

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

use pkd_common::{ClusterSpec, Error, Result, DEFAULT_NAMESPACE};

use crate::constants::{
    calico_config_map_name, cluster_resource_name, CALICO_BLOCK_SIZE,
    CALICO_OPERATOR_API_VERSION, METALLB_CONFIG_NAME, METALLB_NAMESPACE,
};

/// Key the Calico ClusterResourceSet reads the Installation from
pub const CALICO_CONFIG_MAP_KEY: &str = "custom-resources.yaml";

/// File name under which the MetalLB ConfigMap is written
pub fn metallb_manifest_name(cluster: &str) -> String {
    cluster_resource_name(cluster, "metallb")
}

/// File name under which the Calico installation ConfigMap is written
pub fn calico_manifest_name(cluster: &str) -> String {
    format!("calico-cni-installation-{cluster}")
}

/// Calico operator Installation wrapped in a ConfigMap
///
/// The pod subnet is the only IP pool. The pool can't be changed after
/// install, so this is the one chance to get it right.
pub fn generate_calico_config_map(spec: &ClusterSpec) -> Result<ConfigMap> {
    let installation = json!({
        "apiVersion": CALICO_OPERATOR_API_VERSION,
        "kind": "Installation",
        "metadata": { "name": "default" },
        "spec": {
            "calicoNetwork": {
                "ipPools": [{
                    "blockSize": CALICO_BLOCK_SIZE,
                    "cidr": spec.metadata.pod_subnet(),
                    "encapsulation": "IPIP",
                    "natOutgoing": "Enabled",
                    "nodeSelector": "all()",
                }],
                "bgp": "Enabled",
            }
        }
    });
    let installation = serde_yaml::to_string(&installation)
        .map_err(|e| Error::serialization_for_kind("Installation", e.to_string()))?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(calico_config_map_name(spec.name())),
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CALICO_CONFIG_MAP_KEY.to_string(),
            installation,
        )])),
        ..Default::default()
    })
}

/// MetalLB layer2 address pool
pub fn generate_metallb_config_map(spec: &ClusterSpec) -> ConfigMap {
    let config = format!(
        "address-pools:\n- name: default\n  protocol: layer2\n  addresses:\n  - {}\n",
        spec.metadata.metallbaddressrange
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(METALLB_CONFIG_NAME.to_string()),
            namespace: Some(METALLB_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("config".to_string(), config)])),
        ..Default::default()
    }
}
