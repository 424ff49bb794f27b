//! Host inventories: the PreprovisionedInventory objects and the ansible
//! inventory used to seed air-gapped hosts

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use pkd_common::{ClusterSpec, Error, Result, CLUSTERCTL_MOVE_LABEL, DEFAULT_NAMESPACE};

use crate::constants::{
    cluster_resource_name, control_plane_name, ssh_key_secret_name, CLUSTER_NAME_LABEL,
    KIND_PREPROVISIONED_INVENTORY, PREPROVISIONED_API_VERSION, SSH_PORT,
};
use crate::manifest::CAPIManifest;

/// Generate the PreprovisionedInventory for the control plane (`None`) or a
/// worker pool
///
/// Inventories carry the move label so `dkp move` takes them along to the
/// target cluster. Unknown pools yield an inventory with no hosts.
pub fn generate_preprovisioned_inventory(spec: &ClusterSpec, pool: Option<&str>) -> CAPIManifest {
    let cluster = spec.name();
    let (name, nodes) = match pool {
        None => (control_plane_name(cluster), Some(&spec.controlplane)),
        Some(pool) => (
            cluster_resource_name(cluster, pool),
            spec.nodepools.get(pool),
        ),
    };

    let hosts: Vec<_> = nodes
        .into_iter()
        .flat_map(|n| n.addresses())
        .map(|address| json!({ "address": address }))
        .collect();

    CAPIManifest::namespaced_default(
        PREPROVISIONED_API_VERSION,
        KIND_PREPROVISIONED_INVENTORY,
        name,
    )
    .with_labels(BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), cluster.to_string()),
        (CLUSTERCTL_MOVE_LABEL.to_string(), String::new()),
    ]))
    .with_spec(json!({
        "hosts": hosts,
        "sshConfig": {
            "port": SSH_PORT,
            "user": spec.metadata.sshuser,
            "privateKeyRef": {
                "name": ssh_key_secret_name(cluster),
                "namespace": DEFAULT_NAMESPACE,
            }
        }
    }))
}

/// Ansible inventory consumed by `konvoy-image upload artifacts`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnsibleInventory {
    /// The implicit `all` group
    pub all: AnsibleGroup,
}

/// Group variables plus its hosts keyed by address
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnsibleGroup {
    pub vars: AnsibleVars,
    pub hosts: BTreeMap<String, AnsibleHost>,
}

/// Connection settings shared by every host
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnsibleVars {
    pub ansible_user: String,
    pub ansible_port: u16,
    pub ansible_ssh_private_key_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnsibleHost {
    pub ansible_host: String,
}

impl AnsibleInventory {
    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("AnsibleInventory", e.to_string()))
    }
}

/// Build the ansible inventory covering every control-plane and pool host
///
/// The key is copied next to the inventory before upload, so only its file
/// name is referenced.
pub fn ansible_inventory(spec: &ClusterSpec) -> AnsibleInventory {
    let key = &spec.metadata.sshprivatekey;
    let key_file = Path::new(key)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.clone());

    let hosts = std::iter::once(&spec.controlplane)
        .chain(spec.nodepools.values())
        .flat_map(|pool| pool.addresses())
        .map(|address| {
            (
                address.to_string(),
                AnsibleHost {
                    ansible_host: address.to_string(),
                },
            )
        })
        .collect();

    AnsibleInventory {
        all: AnsibleGroup {
            vars: AnsibleVars {
                ansible_user: spec.metadata.sshuser.clone(),
                ansible_port: SSH_PORT,
                ansible_ssh_private_key_file: key_file,
            },
            hosts,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::demo_spec;

    mod preprovisioned {
        use super::*;

        #[test]
        fn control_plane_inventory_lists_control_plane_hosts() {
            let ppi = generate_preprovisioned_inventory(&demo_spec(), None);
            let spec = ppi.spec.unwrap();

            assert_eq!(ppi.metadata.name, "demo-control-plane");
            assert_eq!(spec["hosts"], json!([{ "address": "10.0.0.11" }]));
        }

        #[test]
        fn pool_inventory_lists_pool_hosts() {
            let ppi = generate_preprovisioned_inventory(&demo_spec(), Some("md-0"));
            let spec = ppi.spec.unwrap();

            assert_eq!(ppi.metadata.name, "demo-md-0");
            assert_eq!(spec["hosts"].as_array().unwrap().len(), 2);
            assert_eq!(spec["sshConfig"]["user"], "centos");
            assert_eq!(spec["sshConfig"]["port"], 22);
            assert_eq!(spec["sshConfig"]["privateKeyRef"]["name"], "demo-ssh-key");
        }

        #[test]
        fn inventory_moves_with_the_cluster() {
            let labels = generate_preprovisioned_inventory(&demo_spec(), None)
                .metadata
                .labels
                .unwrap();
            assert_eq!(labels[CLUSTERCTL_MOVE_LABEL], "");
            assert_eq!(labels[CLUSTER_NAME_LABEL], "demo");
        }
    }

    mod ansible {
        use super::*;

        #[test]
        fn covers_every_host_once() {
            let inventory = ansible_inventory(&demo_spec());
            let hosts: Vec<&str> = inventory.all.hosts.keys().map(String::as_str).collect();
            assert_eq!(hosts, vec!["10.0.0.11", "10.0.0.14", "10.0.0.15"]);
            assert_eq!(inventory.all.hosts["10.0.0.14"].ansible_host, "10.0.0.14");
        }

        #[test]
        fn key_is_referenced_by_file_name() {
            let mut spec = demo_spec();
            spec.metadata.sshprivatekey = "/home/centos/.ssh/id_rsa".to_string();
            let inventory = ansible_inventory(&spec);
            assert_eq!(inventory.all.vars.ansible_ssh_private_key_file, "id_rsa");
            assert_eq!(inventory.all.vars.ansible_user, "centos");
        }

        #[test]
        fn yaml_nests_under_all() {
            let yaml = ansible_inventory(&demo_spec()).to_yaml().unwrap();
            assert!(yaml.starts_with("all:\n"));
            assert!(yaml.contains("ansible_port: 22"));
        }
    }
}
