//! Common types for pkd: the cluster specification and shared errors

#![deny(missing_docs)]

pub mod error;
pub mod spec;

pub use error::Error;
pub use spec::{AirGapConfig, ClusterSpec, Metadata, NodePool, RegistryConfig};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace every generated object lives in
pub const DEFAULT_NAMESPACE: &str = "default";

/// Label clusterctl uses to carry objects across a pivot
pub const CLUSTERCTL_MOVE_LABEL: &str = "clusterctl.cluster.x-k8s.io/move";
