//! `pkd generate` - write manifests and overrides without touching a cluster
//!
//! Useful to review what `pkd up` will apply. Objects that only the dkp dry
//! run produces are not written here.

use std::fs;

use clap::Args;
use pkd_capi::ansible_inventory;
use tracing::info;

use super::load_spec;
use crate::pipeline::RuntimeContext;
use crate::{GlobalArgs, Result};

/// Generate inventories, manifests and overrides
#[derive(Args, Debug, Default)]
pub struct GenerateArgs {}

pub async fn run(_args: GenerateArgs, global: &GlobalArgs) -> Result<()> {
    let spec = load_spec(&global.work_dir, &global.config)?;
    let ctx = RuntimeContext::new(spec, &global.work_dir, None)?;
    let ws = &ctx.workspace;

    let manifests = ctx.manifests.write_to(&ws.resources())?;
    fs::create_dir_all(ws.overrides())?;
    let overrides = ctx.overrides.write_to(&ws.overrides())?;

    if ctx.spec.airgap.enabled {
        fs::create_dir_all(ws.kib())?;
        fs::write(
            ws.kib().join("inventory.yaml"),
            ansible_inventory(&ctx.spec).to_yaml()?,
        )?;
    }

    info!(
        cluster = %ctx.name(),
        manifests = manifests.len(),
        overrides = overrides.len(),
        "generation complete"
    );
    Ok(())
}
