//! Cluster specification model
//!
//! [`ClusterSpec`] is the typed form of `cluster.yaml`. Keys follow the
//! lowercase names the tool has always written (`sshuser`, `kibtimeout`,
//! `nodepools`, ...); unknown keys are ignored so older files keep loading.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Pod CIDR used when `metadata.podsubnet` is empty
pub const DEFAULT_POD_SUBNET: &str = "192.168.0.0/16";

/// Service CIDR used when `metadata.servicesubnet` is empty
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";

/// Cluster readiness wait used when `metadata.kibtimeout` is unset
pub const DEFAULT_KIB_TIMEOUT_MINUTES: u32 = 40;

/// Control-plane readiness wait after pivot when `metadata.pivottimeout` is unset
pub const DEFAULT_PIVOT_TIMEOUT_MINUTES: u32 = 20;

/// Flag enabling registry credentials on a node pool
pub const FLAG_REGISTRY: &str = "registry";

/// Flag enabling NVIDIA GPU support on a node pool
pub const FLAG_GPU: &str = "gpu";

/// Declarative description of a preprovisioned cluster
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct ClusterSpec {
    /// Naming, access and network settings
    #[serde(default)]
    pub metadata: Metadata,
    /// Registry credentials handed to the image builder
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Control-plane hosts and flags
    #[serde(default)]
    pub controlplane: NodePool,
    /// Worker pools keyed by pool name
    #[serde(default)]
    pub nodepools: BTreeMap<String, NodePool>,
    /// Disconnected install settings
    #[serde(default)]
    pub airgap: AirGapConfig,
}

/// Cluster-wide settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Metadata {
    /// Cluster name, prefix of every generated object
    #[serde(default)]
    pub name: String,
    /// User the provisioner logs in as
    #[serde(default)]
    pub sshuser: String,
    /// Path to the private key for `sshuser`
    #[serde(default)]
    pub sshprivatekey: String,
    /// Interface kube-vip binds the control-plane address to
    #[serde(default)]
    pub interfacename: String,
    /// Control-plane endpoint address
    #[serde(default, alias = "kubeviploadbalancer")]
    pub loadbalancer: String,
    /// Pod CIDR; see [`Metadata::pod_subnet`]
    #[serde(default)]
    pub podsubnet: String,
    /// Service CIDR; see [`Metadata::service_subnet`]
    #[serde(default)]
    pub servicesubnet: String,
    /// MetalLB layer2 address range, e.g. `10.0.0.20-10.0.0.24`
    #[serde(default, alias = "metaladdressrange")]
    pub metallbaddressrange: String,
    /// Minutes to wait for cluster readiness before pivot
    #[serde(
        default = "default_kib_timeout",
        deserialize_with = "deserialize_minutes"
    )]
    pub kibtimeout: u32,
    /// Minutes to wait for control-plane readiness after pivot
    #[serde(
        default = "default_pivot_timeout",
        deserialize_with = "deserialize_minutes"
    )]
    pub pivottimeout: u32,
    /// DKP release, e.g. `v2.6.0`
    #[serde(default)]
    pub dkpversion: String,
    /// Konvoy image builder release, e.g. `v2.5.0`
    #[serde(default)]
    pub kibversion: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            sshuser: String::new(),
            sshprivatekey: String::new(),
            interfacename: String::new(),
            loadbalancer: String::new(),
            podsubnet: String::new(),
            servicesubnet: String::new(),
            metallbaddressrange: String::new(),
            kibtimeout: DEFAULT_KIB_TIMEOUT_MINUTES,
            pivottimeout: DEFAULT_PIVOT_TIMEOUT_MINUTES,
            dkpversion: String::new(),
            kibversion: String::new(),
        }
    }
}

impl Metadata {
    /// Pod CIDR, falling back to [`DEFAULT_POD_SUBNET`]
    pub fn pod_subnet(&self) -> &str {
        non_empty_or(&self.podsubnet, DEFAULT_POD_SUBNET)
    }

    /// Service CIDR, falling back to [`DEFAULT_SERVICE_SUBNET`]
    pub fn service_subnet(&self) -> &str {
        non_empty_or(&self.servicesubnet, DEFAULT_SERVICE_SUBNET)
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

fn default_kib_timeout() -> u32 {
    DEFAULT_KIB_TIMEOUT_MINUTES
}

fn default_pivot_timeout() -> u32 {
    DEFAULT_PIVOT_TIMEOUT_MINUTES
}

/// Accepts `40` as well as `"40"`; older files stored timeouts as strings.
fn deserialize_minutes<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Minutes {
        Number(u32),
        Text(String),
    }

    match Minutes::deserialize(deserializer)? {
        Minutes::Number(n) => Ok(n),
        Minutes::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid timeout in minutes: {s:?}"))),
    }
}

/// Registry credentials
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry URL, with or without scheme and port
    #[serde(default)]
    pub host: String,
    /// Registry user
    #[serde(default)]
    pub username: String,
    /// Registry password
    #[serde(default)]
    pub password: String,
    /// Pre-encoded basic auth, passed through unchanged
    #[serde(default)]
    pub auth: String,
    /// Identity token, passed through unchanged
    #[serde(default, rename = "identityToken")]
    pub identity_token: String,
}

/// A set of hosts provisioned with the same settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePool {
    /// Host alias to IP address
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
    /// Feature flags; only `registry` and `gpu` have meaning
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl NodePool {
    /// Whether the named flag is present and true
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Host addresses ordered by alias
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.hosts.values().map(String::as_str)
    }

    /// Number of hosts in the pool
    pub fn size(&self) -> usize {
        self.hosts.len()
    }
}

/// Disconnected install settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct AirGapConfig {
    /// Whether the install runs without outbound network access
    #[serde(default)]
    pub enabled: bool,
    /// OS bundle identifier, e.g. `centos_7_x86_64`
    #[serde(default)]
    pub osversion: String,
    /// Kubernetes version of the OS package bundle, e.g. `1.22.8`
    #[serde(default)]
    pub k8sversion: String,
    /// containerd bundle identifier, e.g. `centos-7.9-x86_64`
    #[serde(default)]
    pub containerdversion: String,
    /// Whether the pkd binary itself is added to the bundle
    #[serde(default)]
    pub includepkd: bool,
    /// Platform of the bundled pkd binary: `linux`, `macos` or `windows`
    #[serde(default)]
    pub pkdos: String,
}

impl AirGapConfig {
    /// Fails when air-gap is enabled without the bundle versions it needs
    pub fn validate(&self, cluster: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for (field, value) in [
            ("airgap.osversion", &self.osversion),
            ("airgap.k8sversion", &self.k8sversion),
            ("airgap.containerdversion", &self.containerdversion),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation_for_field(
                    cluster,
                    field,
                    "required when air-gap is enabled",
                ));
            }
        }
        Ok(())
    }
}

impl ClusterSpec {
    /// Cluster name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Parse a spec from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a spec from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Render the spec as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Example spec written by `pkd init`
    pub fn sample(air_gapped: bool) -> Self {
        let hosts = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(alias, ip)| (alias.to_string(), ip.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        let registry_only = BTreeMap::from([(FLAG_REGISTRY.to_string(), true)]);

        let mut nodepools = BTreeMap::from([(
            "md-0".to_string(),
            NodePool {
                hosts: hosts(&[
                    ("worker1", "10.0.0.14"),
                    ("worker2", "10.0.0.15"),
                    ("worker3", "10.0.0.16"),
                    ("worker4", "10.0.0.17"),
                    ("worker5", "10.0.0.18"),
                ]),
                flags: registry_only.clone(),
            },
        )]);
        if !air_gapped {
            nodepools.insert(
                "md-1".to_string(),
                NodePool {
                    hosts: hosts(&[("worker1", "10.0.0.19"), ("worker2", "10.0.0.20")]),
                    flags: registry_only.clone(),
                },
            );
        }

        let (dkpversion, kibversion, airgap) = if air_gapped {
            (
                "v2.2.2",
                "v1.17.2",
                AirGapConfig {
                    enabled: true,
                    osversion: "centos_7_x86_64".to_string(),
                    k8sversion: "1.22.8".to_string(),
                    containerdversion: "centos-7.9-x86_64".to_string(),
                    includepkd: true,
                    pkdos: "linux".to_string(),
                },
            )
        } else {
            ("v2.6.0", "v2.5.0", AirGapConfig::default())
        };

        Self {
            metadata: Metadata {
                name: "demo-cluster".to_string(),
                sshuser: "user".to_string(),
                sshprivatekey: "id_rsa".to_string(),
                interfacename: "ens192".to_string(),
                loadbalancer: "10.0.0.10".to_string(),
                podsubnet: DEFAULT_POD_SUBNET.to_string(),
                servicesubnet: DEFAULT_SERVICE_SUBNET.to_string(),
                metallbaddressrange: "10.0.0.20-10.0.0.24".to_string(),
                kibtimeout: DEFAULT_KIB_TIMEOUT_MINUTES,
                pivottimeout: DEFAULT_PIVOT_TIMEOUT_MINUTES,
                dkpversion: dkpversion.to_string(),
                kibversion: kibversion.to_string(),
            },
            registry: RegistryConfig {
                host: "https://registry-1.docker.io".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
                ..Default::default()
            },
            controlplane: NodePool {
                hosts: hosts(&[
                    ("controlplane1", "10.0.0.11"),
                    ("controlplane2", "10.0.0.12"),
                    ("controlplane3", "10.0.0.13"),
                ]),
                flags: registry_only,
            },
            nodepools,
            airgap,
        }
    }
}
