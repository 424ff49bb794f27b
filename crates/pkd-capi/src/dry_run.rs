//! Splitting `dkp create cluster --dry-run` output into per-object files
//!
//! The dry run renders the full object graph for a stock preprovisioned
//! cluster. Objects the generator re-emits are dropped here; everything else
//! (PreprovisionedCluster, addon ClusterResourceSets, secrets) is forwarded
//! untouched into the resources directory.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use pkd_common::{ClusterSpec, Error, Result};

use crate::constants::{
    calico_config_map_name, KIND_CLUSTER, KIND_CONFIG_MAP, KIND_KUBEADM_CONFIG_TEMPLATE,
    KIND_KUBEADM_CONTROL_PLANE, KIND_MACHINE_DEPLOYMENT, KIND_PREPROVISIONED_MACHINE_TEMPLATE,
};
use crate::manifest::GeneratedManifest;

/// Kinds whose cluster-prefixed objects are always regenerated
const REGENERATED_KINDS: &[&str] = &[
    KIND_KUBEADM_CONTROL_PLANE,
    KIND_KUBEADM_CONFIG_TEMPLATE,
    KIND_MACHINE_DEPLOYMENT,
    KIND_PREPROVISIONED_MACHINE_TEMPLATE,
];

/// Objects whose dry-run rendering is replaced by a generated one
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupersededSet {
    exact: BTreeSet<(String, String)>,
    prefix: String,
}

impl SupersededSet {
    /// Superseded objects for a cluster
    ///
    /// Besides the exact Cluster and CNI ConfigMap matches, every control
    /// plane and worker object named `<cluster>-*` is dropped. The dry run
    /// always renders a default `md-0` pool, which must not survive when the
    /// cluster has no such pool.
    pub fn for_cluster(spec: &ClusterSpec) -> Self {
        let name = spec.name();
        Self {
            exact: BTreeSet::from([
                (name.to_string(), KIND_CLUSTER.to_string()),
                (calico_config_map_name(name), KIND_CONFIG_MAP.to_string()),
            ]),
            prefix: format!("{name}-"),
        }
    }

    /// Whether an object with this name and kind is superseded
    pub fn contains(&self, name: &str, kind: &str) -> bool {
        self.exact.contains(&(name.to_string(), kind.to_string()))
            || (REGENERATED_KINDS.contains(&kind) && name.starts_with(&self.prefix))
    }
}

/// A dry-run object passed through unmodified
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardedObject {
    /// `metadata.name`
    pub name: String,
    /// `kind`
    pub kind: String,
    /// The object as decoded
    pub object: Value,
}

/// Result of splitting a dry-run stream
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitOutcome {
    /// Objects to write to the resources directory, in stream order
    pub forwarded: Vec<ForwardedObject>,
    /// `(name, kind)` of every discarded object
    pub discarded: Vec<(String, String)>,
}

impl SplitOutcome {
    /// Write forwarded objects as `<name>-<kind>.yaml` files into `dir`
    pub fn write_forwarded(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        self.forwarded
            .iter()
            .map(|f| GeneratedManifest::from_object(&f.name, &f.kind, &f.object)?.write_to(dir))
            .collect()
    }
}

/// Split a multi-document YAML stream
///
/// Empty documents are skipped. A document that fails to decode, or lacks
/// `kind` or `metadata.name`, aborts the split.
pub fn split(reader: impl Read, superseded: &SupersededSet) -> Result<SplitOutcome> {
    let mut outcome = SplitOutcome::default();

    for (index, document) in serde_yaml::Deserializer::from_reader(reader).enumerate() {
        let object = Value::deserialize(document)?;
        if object.is_null() {
            continue;
        }

        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::serialization(format!("dry-run document {index} has no kind")))?
            .to_string();
        let name = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::serialization_for_kind(
                    kind.clone(),
                    format!("dry-run document {index} has no metadata.name"),
                )
            })?
            .to_string();

        if superseded.contains(&name, &kind) {
            debug!(%name, %kind, "discarding superseded dry-run object");
            outcome.discarded.push((name, kind));
        } else {
            outcome.forwarded.push(ForwardedObject { name, kind, object });
        }
    }

    Ok(outcome)
}
