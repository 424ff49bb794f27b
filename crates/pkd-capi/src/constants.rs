//! Centralized constants for the pkd-capi crate
//!
//! API versions, kinds and well-known paths shared by the generators, the
//! override resolver and the dry-run splitter.

// =============================================================================
// API Versions
// =============================================================================

/// CAPI core API version (Cluster, MachineDeployment)
pub const CAPI_CLUSTER_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Kubeadm control plane API version
pub const CAPI_CONTROLPLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";

/// Kubeadm bootstrap API version (KubeadmConfigTemplate)
pub const CAPI_BOOTSTRAP_API_VERSION: &str = "bootstrap.cluster.x-k8s.io/v1beta1";

/// DKP preprovisioned infrastructure API version
pub const PREPROVISIONED_API_VERSION: &str = "infrastructure.cluster.konvoy.d2iq.io/v1alpha1";

/// Calico operator API version
pub const CALICO_OPERATOR_API_VERSION: &str = "operator.tigera.io/v1";

// =============================================================================
// Kinds
// =============================================================================

/// CAPI Cluster
pub const KIND_CLUSTER: &str = "Cluster";
/// Kubeadm control plane
pub const KIND_KUBEADM_CONTROL_PLANE: &str = "KubeadmControlPlane";
/// Worker bootstrap template
pub const KIND_KUBEADM_CONFIG_TEMPLATE: &str = "KubeadmConfigTemplate";
/// Worker machine set
pub const KIND_MACHINE_DEPLOYMENT: &str = "MachineDeployment";
/// DKP preprovisioned machine template
pub const KIND_PREPROVISIONED_MACHINE_TEMPLATE: &str = "PreprovisionedMachineTemplate";
/// DKP host inventory
pub const KIND_PREPROVISIONED_INVENTORY: &str = "PreprovisionedInventory";
/// DKP preprovisioned cluster infrastructure
pub const KIND_PREPROVISIONED_CLUSTER: &str = "PreprovisionedCluster";
/// Core ConfigMap
pub const KIND_CONFIG_MAP: &str = "ConfigMap";

// =============================================================================
// Labels
// =============================================================================

/// CAPI cluster ownership label
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// CAPI machine deployment ownership label
pub const DEPLOYMENT_NAME_LABEL: &str = "cluster.x-k8s.io/deployment-name";

/// Konvoy cluster name label used by the DKP addon controllers
pub const KONVOY_CLUSTER_NAME_LABEL: &str = "konvoy.d2iq.io/cluster-name";

// =============================================================================
// Node Configuration
// =============================================================================

/// containerd CRI socket
pub const CRI_SOCKET: &str = "/run/containerd/containerd.sock";

/// Flex volume plugin directory used by kubelet and controller-manager
pub const VOLUME_PLUGIN_DIR: &str = "/usr/libexec/kubernetes/kubelet-plugins/volume/exec/";

/// Provider ID template filled in by the preprovisioned provider
pub const PROVIDER_ID_TEMPLATE: &str = "'{{ .ProviderID }}'";

/// Command appended to GPU pools so the NVIDIA driver loads after join
pub const GPU_REBOOT_COMMAND: &str = "sudo shutdown -r 5 & exit 0";

/// SSH port of preprovisioned hosts
pub const SSH_PORT: u16 = 22;

// =============================================================================
// Add-ons
// =============================================================================

/// Namespace MetalLB reads its configuration from
pub const METALLB_NAMESPACE: &str = "metallb-system";

/// Name of the MetalLB configuration ConfigMap
pub const METALLB_CONFIG_NAME: &str = "config";

/// Calico IP pool block size
pub const CALICO_BLOCK_SIZE: u32 = 26;

// =============================================================================
// Helper Functions
// =============================================================================

/// Name of a per-cluster resource, `<cluster>-<suffix>`
pub fn cluster_resource_name(cluster: &str, suffix: &str) -> String {
    format!("{cluster}-{suffix}")
}

/// Name of the control-plane scoped resources
pub fn control_plane_name(cluster: &str) -> String {
    cluster_resource_name(cluster, "control-plane")
}

/// Name of the ConfigMap the Calico ClusterResourceSet reads
pub fn calico_config_map_name(cluster: &str) -> String {
    format!("calico-cni-{cluster}")
}

/// Name of the SSH key secret referenced by every inventory
pub fn ssh_key_secret_name(cluster: &str) -> String {
    cluster_resource_name(cluster, "ssh-key")
}

/// Name of the etcd encryption secret mounted on control-plane nodes
pub fn etcd_encryption_secret_name(cluster: &str) -> String {
    cluster_resource_name(cluster, "etcd-encryption-config")
}
