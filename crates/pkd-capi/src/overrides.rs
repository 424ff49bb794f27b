//! Image-builder override resolution
//!
//! Node pools opt into registry credentials and NVIDIA support with the
//! `registry` and `gpu` flags. Each flag combination maps to exactly one
//! override document, shared by every pool with that combination and
//! registered in the cluster as a secret the PreprovisionedMachineTemplate
//! points at through `overrideRef`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use pkd_common::spec::{FLAG_GPU, FLAG_REGISTRY};
use pkd_common::{ClusterSpec, Error, NodePool, RegistryConfig, Result};

use crate::constants::control_plane_name;
use crate::policy::{AirGapGpu, VersionPolicy};

/// Registry that needs no mirror path rewriting
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

const OS_PACKAGES_BUNDLE: &str = "{{ playbook_dir }}/../artifacts/{{ kubernetes_version }}_{{ ansible_distribution|lower }}_{{ ansible_distribution_major_version }}_x86_64.tar.gz";
const PIP_PACKAGES_BUNDLE: &str = "{{ playbook_dir }}/../artifacts/pip-packages.tar.gz";
const IMAGES_BUNDLE_DIR: &str = "{{ playbook_dir}}/../artifacts/images";

/// Which override a pool needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverrideVariant {
    /// Registry credentials only
    Registry,
    /// NVIDIA support only
    Gpu,
    /// Both in one document
    GpuRegistry,
}

impl OverrideVariant {
    /// Variant for a pool's flags, `None` when neither flag is set
    pub fn for_pool(pool: &NodePool) -> Option<Self> {
        match (pool.flag(FLAG_REGISTRY), pool.flag(FLAG_GPU)) {
            (true, true) => Some(Self::GpuRegistry),
            (true, false) => Some(Self::Registry),
            (false, true) => Some(Self::Gpu),
            (false, false) => None,
        }
    }

    fn slug(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Gpu => "gpu",
            Self::GpuRegistry => "gpu-registry",
        }
    }

    fn has_registry(self) -> bool {
        matches!(self, Self::Registry | Self::GpuRegistry)
    }

    fn has_gpu(self) -> bool {
        matches!(self, Self::Gpu | Self::GpuRegistry)
    }

    /// Name of the override document and its secret
    pub fn override_name(self, cluster: &str) -> String {
        format!("{cluster}-{}-override", self.slug())
    }
}

/// Registry addresses as the image builder expects them
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryAddress {
    /// Address images are pulled through
    pub image: String,
    /// Address credentials are matched against
    pub auth: String,
}

/// Shape a registry URL for the image builder
///
/// Hosts with an explicit port and the default Docker Hub registry are used
/// as-is minus the scheme. Any other host gets `/v2/` inserted between the
/// host and its path, and authenticates against the address truncated at
/// its last `/`.
pub fn resolve_registry_address(host: &str) -> RegistryAddress {
    let stripped = strip_scheme(host.trim()).trim_end_matches('/');
    let (authority, path) = match stripped.split_once('/') {
        Some((authority, path)) => (authority, Some(path)),
        None => (stripped, None),
    };

    if authority.contains(':') || authority == DEFAULT_REGISTRY {
        return RegistryAddress {
            image: stripped.to_string(),
            auth: stripped.to_string(),
        };
    }

    let image = match path {
        Some(path) => format!("{authority}/v2/{path}"),
        None => format!("{authority}/v2"),
    };
    let auth = match stripped.rfind('/') {
        Some(idx) => stripped[..idx].to_string(),
        None => stripped.to_string(),
    };
    RegistryAddress { image, auth }
}

fn strip_scheme(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
}

fn scheme_of(host: &str) -> &'static str {
    if host.trim().starts_with("http://") {
        "http://"
    } else {
        "https://"
    }
}

/// Credentials for one registry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Registry address credentials apply to
    pub host: String,
    /// Registry user
    pub username: String,
    /// Registry password
    pub password: String,
    /// Pre-encoded basic auth
    pub auth: String,
    /// Identity token
    #[serde(rename = "identityToken")]
    pub identity_token: String,
}

/// Mirror images are pulled through
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMirror {
    /// Mirror URL
    pub url: String,
}

/// GPU settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuOverride {
    /// GPU vendors to install drivers for
    pub types: Vec<String>,
}

/// Konvoy image builder override file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_registries_with_auth: Vec<RegistryAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_mirror: Option<RegistryMirror>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_name_extra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_packages_local_bundle_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pip_packages_local_bundle_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_local_bundle_dir: Option<String>,
}

impl OverrideDocument {
    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("OverrideDocument", e.to_string()))
    }
}

/// An override selected for a pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedOverride {
    /// Document and secret name
    pub name: String,
    /// Flag combination it was built for
    pub variant: OverrideVariant,
    /// Document content
    pub document: OverrideDocument,
}

/// Decide which override a pool needs and build it
///
/// Returns `Ok(None)` for pools with neither flag set. A GPU pool in an
/// air-gapped install fails when the release policy cannot build NVIDIA
/// images offline.
pub fn resolve(
    cluster: &str,
    pool: &NodePool,
    registry: &RegistryConfig,
    air_gapped: bool,
    policy: &VersionPolicy,
) -> Result<Option<ResolvedOverride>> {
    let Some(variant) = OverrideVariant::for_pool(pool) else {
        return Ok(None);
    };

    if variant.has_gpu() && air_gapped && policy.air_gap_gpu == AirGapGpu::Reject {
        return Err(Error::validation_for(
            cluster,
            format!(
                "gpu pools are not supported in air-gapped installs with {}",
                policy.name
            ),
        ));
    }

    let mut document = OverrideDocument::default();

    if variant.has_registry() {
        if registry.host.trim().is_empty() {
            return Err(Error::validation_for_field(
                cluster,
                "registry.host",
                "a pool sets the registry flag but no registry host is configured",
            ));
        }
        let address = resolve_registry_address(&registry.host);
        if address.image != DEFAULT_REGISTRY {
            document.registry_mirror = Some(RegistryMirror {
                url: format!("{}{}", scheme_of(&registry.host), address.image),
            });
        }
        document.image_registries_with_auth.push(RegistryAuth {
            host: address.auth,
            username: registry.username.clone(),
            password: registry.password.clone(),
            auth: registry.auth.clone(),
            identity_token: registry.identity_token.clone(),
        });
    }

    if variant.has_gpu() {
        document.gpu = Some(GpuOverride {
            types: vec!["nvidia".to_string()],
        });
        document.build_name_extra = Some("-nvidia".to_string());
    }

    if air_gapped {
        document.os_packages_local_bundle_file = Some(OS_PACKAGES_BUNDLE.to_string());
        document.pip_packages_local_bundle_file = Some(PIP_PACKAGES_BUNDLE.to_string());
        document.images_local_bundle_dir = Some(IMAGES_BUNDLE_DIR.to_string());
    }

    Ok(Some(ResolvedOverride {
        name: variant.override_name(cluster),
        variant,
        document,
    }))
}

/// Overrides for a whole cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverrideSet {
    /// Override name per scope (`<cluster>-control-plane` or `<cluster>-<pool>`)
    pub by_scope: BTreeMap<String, String>,
    /// Distinct documents by name
    pub documents: BTreeMap<String, OverrideDocument>,
}

impl OverrideSet {
    /// Resolve overrides for the control plane and every worker pool
    pub fn resolve(spec: &ClusterSpec, policy: &VersionPolicy) -> Result<Self> {
        let cluster = spec.name();
        let scopes = std::iter::once((control_plane_name(cluster), &spec.controlplane)).chain(
            spec.nodepools
                .iter()
                .map(|(pool, nodes)| (format!("{cluster}-{pool}"), nodes)),
        );

        let mut set = Self::default();
        for (scope, pool) in scopes {
            if let Some(resolved) = resolve(
                cluster,
                pool,
                &spec.registry,
                spec.airgap.enabled,
                policy,
            )? {
                debug!(scope = %scope, name = %resolved.name, "resolved override");
                set.by_scope.insert(scope, resolved.name.clone());
                set.documents.insert(resolved.name, resolved.document);
            }
        }
        Ok(set)
    }

    /// Override referenced by a scope, if any
    pub fn for_scope(&self, scope: &str) -> Option<&str> {
        self.by_scope.get(scope).map(String::as_str)
    }

    /// Write every document to `<dir>/<name>.yaml`, returning name and path
    pub fn write_to(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut written = Vec::with_capacity(self.documents.len());
        for (name, document) in &self.documents {
            let path = dir.join(format!("{name}.yaml"));
            std::fs::write(&path, document.to_yaml()?).map_err(|e| Error::io(&path, e))?;
            written.push((name.clone(), path));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DKP_2_2, DKP_2_6};

    fn pool(registry: bool, gpu: bool) -> NodePool {
        NodePool {
            hosts: BTreeMap::from([("w1".to_string(), "10.0.0.14".to_string())]),
            flags: BTreeMap::from([
                (FLAG_REGISTRY.to_string(), registry),
                (FLAG_GPU.to_string(), gpu),
            ]),
        }
    }

    fn harbor() -> RegistryConfig {
        RegistryConfig {
            host: "https://harbor.example.com/registry".to_string(),
            username: "robot".to_string(),
            password: "s3cret".to_string(),
            ..Default::default()
        }
    }

    mod registry_address {
        use super::*;

        #[test]
        fn explicit_port_is_kept_minus_scheme() {
            let address = resolve_registry_address("https://registry.example.com:5000");
            assert_eq!(address.image, "registry.example.com:5000");
            assert_eq!(address.auth, "registry.example.com:5000");
        }

        #[test]
        fn explicit_port_with_path_is_not_rewritten() {
            let address = resolve_registry_address("https://registry.example.com:5000/team");
            assert_eq!(address.image, "registry.example.com:5000/team");
            assert_eq!(address.auth, "registry.example.com:5000/team");
        }

        #[test]
        fn portless_host_gains_v2_and_auth_is_host_only() {
            let address = resolve_registry_address("https://harbor.example.com/registry");
            assert_eq!(address.image, "harbor.example.com/v2/registry");
            assert_eq!(address.auth, "harbor.example.com");
        }

        #[test]
        fn portless_host_without_path() {
            let address = resolve_registry_address("http://harbor.example.com/");
            assert_eq!(address.image, "harbor.example.com/v2");
            assert_eq!(address.auth, "harbor.example.com");
        }

        #[test]
        fn default_registry_is_never_rewritten() {
            let address = resolve_registry_address("https://registry-1.docker.io");
            assert_eq!(address.image, DEFAULT_REGISTRY);
            assert_eq!(address.auth, DEFAULT_REGISTRY);
        }
    }

    mod resolution {
        use super::*;

        #[test]
        fn unflagged_pool_gets_no_override() {
            let resolved = resolve("demo", &pool(false, false), &harbor(), false, &DKP_2_6).unwrap();
            assert!(resolved.is_none());
        }

        #[test]
        fn unknown_flags_are_ignored() {
            let mut nodes = pool(false, false);
            nodes.flags.insert("turbo".to_string(), true);
            assert!(resolve("demo", &nodes, &harbor(), false, &DKP_2_6).unwrap().is_none());
        }

        #[test]
        fn registry_override_carries_credentials_and_no_gpu() {
            let resolved = resolve("demo", &pool(true, false), &harbor(), false, &DKP_2_6)
                .unwrap()
                .unwrap();

            assert_eq!(resolved.name, "demo-registry-override");
            assert_eq!(resolved.variant, OverrideVariant::Registry);
            let auth = &resolved.document.image_registries_with_auth[0];
            assert_eq!(auth.host, "harbor.example.com");
            assert_eq!(auth.username, "robot");
            assert_eq!(auth.password, "s3cret");
            assert_eq!(
                resolved.document.registry_mirror.as_ref().unwrap().url,
                "https://harbor.example.com/v2/registry"
            );
            assert!(resolved.document.gpu.is_none());
            assert!(!resolved.document.to_yaml().unwrap().contains("gpu"));
        }

        #[test]
        fn docker_hub_needs_no_mirror() {
            let registry = RegistryConfig {
                host: "https://registry-1.docker.io".to_string(),
                ..harbor()
            };
            let resolved = resolve("demo", &pool(true, false), &registry, false, &DKP_2_6)
                .unwrap()
                .unwrap();
            assert!(resolved.document.registry_mirror.is_none());
            assert_eq!(
                resolved.document.image_registries_with_auth[0].host,
                DEFAULT_REGISTRY
            );
        }

        #[test]
        fn gpu_override_adds_nvidia() {
            let resolved = resolve("demo", &pool(false, true), &harbor(), false, &DKP_2_6)
                .unwrap()
                .unwrap();
            assert_eq!(resolved.name, "demo-gpu-override");
            assert_eq!(resolved.document.gpu.unwrap().types, vec!["nvidia"]);
            assert_eq!(resolved.document.build_name_extra.as_deref(), Some("-nvidia"));
            assert!(resolved.document.image_registries_with_auth.is_empty());
        }

        #[test]
        fn both_flags_produce_a_single_combined_document() {
            let resolved = resolve("demo", &pool(true, true), &harbor(), false, &DKP_2_6)
                .unwrap()
                .unwrap();
            assert_eq!(resolved.name, "demo-gpu-registry-override");
            assert_eq!(resolved.document.image_registries_with_auth.len(), 1);
            assert!(resolved.document.gpu.is_some());
        }

        #[test]
        fn resolution_is_deterministic() {
            let first = resolve("demo", &pool(true, true), &harbor(), true, &DKP_2_6).unwrap();
            let second = resolve("demo", &pool(true, true), &harbor(), true, &DKP_2_6).unwrap();
            assert_eq!(first, second);
            assert_eq!(
                first.unwrap().document.to_yaml().unwrap(),
                second.unwrap().document.to_yaml().unwrap()
            );
        }

        #[test]
        fn registry_flag_without_host_is_rejected() {
            let err = resolve(
                "demo",
                &pool(true, false),
                &RegistryConfig::default(),
                false,
                &DKP_2_6,
            )
            .unwrap_err();
            assert!(err.is_validation());
        }
    }

    mod air_gap {
        use super::*;

        #[test]
        fn air_gapped_override_points_at_local_bundles() {
            let resolved = resolve("demo", &pool(true, false), &harbor(), true, &DKP_2_2)
                .unwrap()
                .unwrap();
            assert!(resolved.document.os_packages_local_bundle_file.is_some());
            assert!(resolved.document.pip_packages_local_bundle_file.is_some());
            assert_eq!(
                resolved.document.images_local_bundle_dir.as_deref(),
                Some(IMAGES_BUNDLE_DIR)
            );
        }

        #[test]
        fn air_gapped_gpu_is_rejected_by_legacy_policy() {
            let err = resolve("demo", &pool(false, true), &harbor(), true, &DKP_2_2).unwrap_err();
            assert!(err.to_string().contains("air-gapped"));
        }

        #[test]
        fn air_gapped_gpu_is_built_by_current_policy() {
            let resolved = resolve("demo", &pool(true, true), &harbor(), true, &DKP_2_6)
                .unwrap()
                .unwrap();
            assert!(resolved.document.gpu.is_some());
            assert!(resolved.document.images_local_bundle_dir.is_some());
        }
    }

    mod override_set {
        use super::*;

        fn spec() -> ClusterSpec {
            let mut spec = ClusterSpec::default();
            spec.metadata.name = "demo".to_string();
            spec.registry = harbor();
            spec.controlplane = pool(true, false);
            spec.nodepools.insert("md-0".to_string(), pool(true, false));
            spec.nodepools.insert("gpu".to_string(), pool(false, true));
            spec.nodepools.insert("plain".to_string(), pool(false, false));
            spec
        }

        #[test]
        fn pools_with_the_same_flags_share_a_document() {
            let set = OverrideSet::resolve(&spec(), &DKP_2_6).unwrap();

            assert_eq!(set.documents.len(), 2);
            assert_eq!(set.for_scope("demo-control-plane"), Some("demo-registry-override"));
            assert_eq!(set.for_scope("demo-md-0"), Some("demo-registry-override"));
            assert_eq!(set.for_scope("demo-gpu"), Some("demo-gpu-override"));
            assert_eq!(set.for_scope("demo-plain"), None);
        }

        #[test]
        fn write_to_creates_one_file_per_document() {
            let dir = tempfile::tempdir().unwrap();
            let set = OverrideSet::resolve(&spec(), &DKP_2_6).unwrap();
            let written = set.write_to(dir.path()).unwrap();

            assert_eq!(written.len(), 2);
            assert!(dir.path().join("demo-registry-override.yaml").exists());
            assert!(dir.path().join("demo-gpu-override.yaml").exists());
        }
    }
}
