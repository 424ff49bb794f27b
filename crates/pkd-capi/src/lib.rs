//! Cluster API manifests for DKP preprovisioned clusters
//!
//! This crate provides:
//! - Generators for every CAPI object a preprovisioned cluster needs
//! - Version policies capturing per-release differences
//! - Override resolution for registry and GPU node pools
//! - Splitting of `dkp create cluster --dry-run` output

pub mod constants;
pub mod dry_run;
pub mod generator;
pub mod manifest;
pub mod overrides;
pub mod policy;

pub use dry_run::{split, ForwardedObject, SplitOutcome, SupersededSet};
pub use generator::{
    ansible_inventory, generate, validate, AnsibleInventory, GenerationContext, ManifestSet,
};
pub use manifest::{manifest_file_name, CAPIManifest, GeneratedManifest, ManifestMetadata};
pub use overrides::{
    resolve_registry_address, OverrideDocument, OverrideSet, OverrideVariant, RegistryAddress,
    ResolvedOverride,
};
pub use policy::{AirGapGpu, VersionPolicy, DKP_2_2, DKP_2_6};
