//! `pkd up` - provision the cluster described by cluster.yaml
//!
//! Runs the full pipeline once: bootstrap cluster, dry run, manifests and
//! overrides, apply, wait, pivot, kubeconfig merge. Ctrl-C aborts the run and
//! leaves whatever was already created in place.

use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use super::load_spec;
use crate::pipeline::{plan, Pipeline, PlanOptions, RuntimeContext};
use crate::runner::TokioCommandRunner;
use crate::{Error, GlobalArgs, Result};

/// Provision the cluster
#[derive(Args, Debug, Default)]
pub struct UpArgs {
    /// Stop after generating manifests so they can be edited before they are applied
    #[arg(long, alias = "yee-haw")]
    pub pause: bool,

    /// Kubeconfig to merge the new cluster into (default: ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

pub async fn run(args: UpArgs, global: &GlobalArgs) -> Result<()> {
    let spec = load_spec(&global.work_dir, &global.config)?;
    let ctx = RuntimeContext::new(spec, &global.work_dir, args.kubeconfig)?;
    let stages = plan(PlanOptions {
        air_gapped: ctx.spec.airgap.enabled,
        pause: args.pause,
    });

    info!(
        cluster = %ctx.name(),
        stages = stages.len(),
        work_dir = %ctx.workspace.root.display(),
        "starting provisioning"
    );

    let runner = TokioCommandRunner;
    let mut pipeline = Pipeline::new(&ctx, &runner);
    tokio::select! {
        result = pipeline.run(&stages) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(cluster = %ctx.name(), "interrupted, external resources are left as they are");
            Err(Error::Interrupted)
        }
    }
}
