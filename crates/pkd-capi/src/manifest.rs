//! Untyped Kubernetes manifests and their on-disk form

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use pkd_common::{Error, Result, DEFAULT_NAMESPACE};

/// A CAPI manifest represented as an untyped Kubernetes resource
///
/// Holds the API version, kind, metadata and an untyped `spec`. ConfigMaps
/// use the typed `k8s-openapi` objects instead.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CAPIManifest {
    /// API version (e.g., "cluster.x-k8s.io/v1beta1")
    pub api_version: String,
    /// Kind of resource (e.g., "Cluster", "MachineDeployment")
    pub kind: String,
    /// Resource metadata
    pub metadata: ManifestMetadata,
    /// Resource spec (untyped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
}

impl CAPIManifest {
    /// Create a new manifest in the given namespace
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                namespace: Some(namespace.into()),
                labels: None,
            },
            spec: None,
        }
    }

    /// Create a new manifest in the `default` namespace
    pub fn namespaced_default(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(api_version, kind, name, DEFAULT_NAMESPACE)
    }

    /// Set the spec for this manifest
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Add labels to the manifest
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata.labels = Some(labels);
        self
    }

    /// Serialize the manifest to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind(self.kind.clone(), e.to_string()))
    }
}

/// Metadata for a CAPI manifest
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestMetadata {
    /// Name of the resource
    pub name: String,
    /// Namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// A rendered manifest paired with the name its file is written under
///
/// `name` is usually the object name. The add-on ConfigMaps are keyed by
/// the file names DKP users expect (`<cluster>-metallb`,
/// `calico-cni-installation-<cluster>`) rather than their object names.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedManifest {
    /// Resource name used for the file
    pub name: String,
    /// Resource kind
    pub kind: String,
    /// YAML document
    pub document: String,
}

impl GeneratedManifest {
    /// Render a manifest, keyed by its own name and kind
    pub fn from_manifest(manifest: &CAPIManifest) -> Result<Self> {
        Ok(Self {
            name: manifest.metadata.name.clone(),
            kind: manifest.kind.clone(),
            document: manifest.to_yaml()?,
        })
    }

    /// Render any serializable object under an explicit name and kind
    pub fn from_object<T: Serialize>(
        name: impl Into<String>,
        kind: impl Into<String>,
        object: &T,
    ) -> Result<Self> {
        let kind = kind.into();
        let document = serde_yaml::to_string(object)
            .map_err(|e| Error::serialization_for_kind(kind.clone(), e.to_string()))?;
        Ok(Self {
            name: name.into(),
            kind,
            document,
        })
    }

    /// `<name>-<kind>.yaml`
    pub fn file_name(&self) -> String {
        manifest_file_name(&self.name, &self.kind)
    }

    /// Write the document into `dir`, returning the path written
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        std::fs::write(&path, &self.document).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }
}

/// File name a resource is stored under in the resources directory
pub fn manifest_file_name(name: &str, kind: &str) -> String {
    format!("{name}-{kind}.yaml")
}
