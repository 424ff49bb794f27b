//! CAPI manifest generation for DKP preprovisioned clusters
//!
//! [`generate`] turns a validated [`ClusterSpec`] into every object the
//! provisioning run applies: the Cluster, the control plane, one bootstrap
//! template, machine deployment and machine template per worker pool, the
//! host inventories, and the CNI and load-balancer ConfigMaps.
//!
//! Generation is pure and all-or-nothing. Nothing touches the filesystem
//! until [`ManifestSet::write_to`] is called on a complete set.

mod addons;
mod cluster;
mod control_plane;
mod inventory;
mod workers;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

use pkd_common::{ClusterSpec, Error, Result};

use crate::constants::{cluster_resource_name, KIND_CONFIG_MAP, KIND_PREPROVISIONED_INVENTORY};
use crate::manifest::GeneratedManifest;
use crate::overrides::OverrideSet;
use crate::policy::{FileContent, NodeFile, VersionPolicy};

pub use addons::{
    calico_manifest_name, generate_calico_config_map, generate_metallb_config_map,
    metallb_manifest_name,
};
pub use cluster::generate_cluster;
pub use control_plane::{generate_control_plane_machine_template, generate_kubeadm_control_plane};
pub use inventory::{ansible_inventory, generate_preprovisioned_inventory, AnsibleInventory};
pub use workers::{
    generate_kubeadm_config_template, generate_machine_deployment,
    generate_pool_machine_template,
};

/// Everything a generator needs besides the object it builds
#[derive(Clone, Copy, Debug)]
pub struct GenerationContext<'a> {
    /// The cluster being generated
    pub spec: &'a ClusterSpec,
    /// Release-specific settings
    pub policy: &'a VersionPolicy,
    /// Override names per scope
    pub overrides: &'a OverrideSet,
}

impl<'a> GenerationContext<'a> {
    /// Cluster name
    pub fn name(&self) -> &'a str {
        self.spec.name()
    }

    /// Override referenced by `<cluster>-<scope>`
    pub fn override_for(&self, scope: &str) -> Option<&'a str> {
        self.overrides.for_scope(&cluster_resource_name(self.name(), scope))
    }
}

/// Generated manifests for one cluster, in apply order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManifestSet {
    manifests: Vec<GeneratedManifest>,
}

impl ManifestSet {
    /// All manifests
    pub fn manifests(&self) -> &[GeneratedManifest] {
        &self.manifests
    }

    /// Number of manifests
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Find a manifest by name and kind
    pub fn get(&self, name: &str, kind: &str) -> Option<&GeneratedManifest> {
        self.manifests
            .iter()
            .find(|m| m.name == name && m.kind == kind)
    }

    /// Host inventories, applied before the dry run
    pub fn inventories(&self) -> impl Iterator<Item = &GeneratedManifest> {
        self.manifests
            .iter()
            .filter(|m| m.kind == KIND_PREPROVISIONED_INVENTORY)
    }

    /// Write every manifest into `dir`, returning the paths in set order
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        self.manifests.iter().map(|m| m.write_to(dir)).collect()
    }

    /// Write only the host inventories into `dir`
    pub fn write_inventories_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        self.inventories().map(|m| m.write_to(dir)).collect()
    }

    fn push(&mut self, manifest: GeneratedManifest) {
        self.manifests.push(manifest);
    }
}

/// Check the fields every generator depends on
pub fn validate(spec: &ClusterSpec) -> Result<()> {
    let name = spec.name();
    if name.trim().is_empty() {
        return Err(Error::validation_for_field(
            pkd_common::error::UNKNOWN_CONTEXT,
            "metadata.name",
            "cluster name must not be empty",
        ));
    }
    if !is_dns_label(name) {
        return Err(Error::validation_for_field(
            name,
            "metadata.name",
            "cluster name must be lowercase alphanumerics and '-'",
        ));
    }

    for (field, value) in [
        ("metadata.sshuser", &spec.metadata.sshuser),
        ("metadata.sshprivatekey", &spec.metadata.sshprivatekey),
        ("metadata.metallbaddressrange", &spec.metadata.metallbaddressrange),
    ] {
        if value.trim().is_empty() {
            return Err(Error::validation_for_field(name, field, "must not be empty"));
        }
    }

    for (field, cidr) in [
        ("metadata.podsubnet", spec.metadata.pod_subnet()),
        ("metadata.servicesubnet", spec.metadata.service_subnet()),
    ] {
        if !looks_like_cidr(cidr) {
            return Err(Error::validation_for_field(
                name,
                field,
                format!("{cidr:?} is not a CIDR block"),
            ));
        }
    }

    if spec.controlplane.hosts.is_empty() {
        return Err(Error::validation_for_field(
            name,
            "controlplane.hosts",
            "at least one control-plane host is required",
        ));
    }

    let mut seen = BTreeSet::new();
    let pools = std::iter::once(("controlplane", &spec.controlplane))
        .chain(spec.nodepools.iter().map(|(k, v)| (k.as_str(), v)));
    for (pool, nodes) in pools {
        if pool != "controlplane" && !is_dns_label(pool) {
            return Err(Error::validation_for_field(
                name,
                format!("nodepools.{pool}"),
                "pool name must be lowercase alphanumerics and '-'",
            ));
        }
        if pool != "controlplane" && nodes.hosts.is_empty() {
            return Err(Error::validation_for_field(
                name,
                format!("nodepools.{pool}.hosts"),
                "a node pool needs at least one host",
            ));
        }
        for address in nodes.addresses() {
            if !seen.insert(address) {
                return Err(Error::validation_for_field(
                    name,
                    format!("nodepools.{pool}.hosts"),
                    format!("host {address} appears in more than one place"),
                ));
            }
        }
    }

    Ok(())
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn looks_like_cidr(value: &str) -> bool {
    match value.split_once('/') {
        Some((addr, prefix)) => {
            addr.parse::<std::net::IpAddr>().is_ok() && prefix.parse::<u8>().is_ok()
        }
        None => false,
    }
}

/// Generate the full manifest set for a cluster
pub fn generate(ctx: &GenerationContext) -> Result<ManifestSet> {
    validate(ctx.spec)?;

    let mut set = ManifestSet::default();
    set.push(GeneratedManifest::from_manifest(&generate_cluster(ctx))?);
    set.push(GeneratedManifest::from_manifest(
        &generate_kubeadm_control_plane(ctx),
    )?);
    set.push(GeneratedManifest::from_manifest(
        &generate_control_plane_machine_template(ctx),
    )?);

    for pool in ctx.spec.nodepools.keys() {
        set.push(GeneratedManifest::from_manifest(
            &generate_kubeadm_config_template(ctx, pool),
        )?);
        set.push(GeneratedManifest::from_manifest(&generate_machine_deployment(
            ctx, pool,
        ))?);
        set.push(GeneratedManifest::from_manifest(
            &generate_pool_machine_template(ctx, pool),
        )?);
    }

    set.push(GeneratedManifest::from_manifest(
        &generate_preprovisioned_inventory(ctx.spec, None),
    )?);
    for pool in ctx.spec.nodepools.keys() {
        set.push(GeneratedManifest::from_manifest(
            &generate_preprovisioned_inventory(ctx.spec, Some(pool)),
        )?);
    }

    let calico = generate_calico_config_map(ctx.spec)?;
    set.push(GeneratedManifest::from_object(
        calico_manifest_name(ctx.name()),
        KIND_CONFIG_MAP,
        &calico,
    )?);
    set.push(GeneratedManifest::from_object(
        metallb_manifest_name(ctx.name()),
        KIND_CONFIG_MAP,
        &generate_metallb_config_map(ctx.spec),
    )?);

    info!(
        cluster = %ctx.name(),
        policy = ctx.policy.name,
        manifests = set.len(),
        "generated manifests"
    );
    Ok(set)
}

/// Render node files as kubeadm `files` entries
fn kubeadm_files(cluster: &str, files: &[NodeFile]) -> Value {
    let entries: Vec<Value> = files
        .iter()
        .map(|file| {
            let mut entry = json!({
                "path": file.path,
                "permissions": file.permissions,
            });
            match file.content {
                FileContent::Inline(content) => {
                    entry["content"] = json!(content);
                }
                FileContent::Secret { suffix, key } => {
                    entry["contentFrom"] = json!({
                        "secret": {
                            "key": key,
                            "name": cluster_resource_name(cluster, suffix),
                        }
                    });
                }
            }
            if let Some(owner) = file.owner {
                entry["owner"] = json!(owner);
            }
            entry
        })
        .collect();
    Value::Array(entries)
}

/// `{apiVersion, kind, name, namespace}` object reference
fn object_ref(api_version: &str, kind: &str, name: &str) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "name": name,
        "namespace": pkd_common::DEFAULT_NAMESPACE,
    })
}
