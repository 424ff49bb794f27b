//! One-shot provisioning of a preprovisioned DKP cluster
//!
//! A run is a fixed, ordered list of [`Stage`]s built by [`plan`]. Stages run
//! strictly in sequence and the first failure aborts the run; nothing is
//! retried or rolled back. A bootstrap cluster created before the failure is
//! left running.
//!
//! Every external program is started through [`CommandRunner`] with the work
//! directory as its working directory, so tests can drive the whole pipeline
//! with a fake.

mod confirm;
mod context;

pub use confirm::{confirm, PROMPT};
pub use context::{RuntimeContext, Workspace};

#[cfg(test)]
pub(crate) use context::test_support;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use pkd_capi::constants::{ssh_key_secret_name, KIND_CONFIG_MAP, KIND_PREPROVISIONED_INVENTORY};
use pkd_capi::generator::metallb_manifest_name;
use pkd_capi::{ansible_inventory, manifest_file_name, GeneratedManifest, SupersededSet};
use pkd_common::CLUSTERCTL_MOVE_LABEL;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, error, info, warn};

use crate::kubeconfig;
use crate::runner::{CommandOutput, CommandRunner, Invocation};
use crate::{Error, Result};

const DKP: &str = "./dkp";
const KUBECTL: &str = "kubectl";
const DOCKER: &str = "docker";
const KONVOY_IMAGE: &str = "./konvoy-image";

/// How long every machine may take to become Ready
const MACHINES_READY_TIMEOUT_MINUTES: u32 = 60;

/// How long the pivoted cluster may take to report Ready
const PIVOTED_READY_TIMEOUT_MINUTES: u32 = 40;

/// A named step of the provisioning run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    PrepareWorkspace,
    ValidatePreflight,
    AirGapSeed,
    BootstrapDown,
    BootstrapUp,
    CreateSSHSecret,
    GenerateInventories,
    ApplyInventories,
    DryRun,
    SplitDryRun,
    GenerateManifests,
    PauseForManualEdit,
    ApplyManifests,
    WaitClusterReady,
    FetchKubeconfig,
    PivotToTargetCluster,
    MergeKubeconfig,
    ApplyLoadBalancerConfig,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Optional parts of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Seed the registry and hosts from local bundles first
    pub air_gapped: bool,
    /// Stop for manual edits before applying manifests
    pub pause: bool,
}

/// The ordered stages of a run
pub fn plan(options: PlanOptions) -> Vec<Stage> {
    use Stage::*;

    let mut stages = vec![PrepareWorkspace, ValidatePreflight];
    if options.air_gapped {
        stages.push(AirGapSeed);
    }
    stages.extend([
        BootstrapDown,
        BootstrapUp,
        CreateSSHSecret,
        GenerateInventories,
        ApplyInventories,
        DryRun,
        SplitDryRun,
        GenerateManifests,
    ]);
    if options.pause {
        stages.push(PauseForManualEdit);
    }
    stages.extend([
        ApplyManifests,
        WaitClusterReady,
        FetchKubeconfig,
        PivotToTargetCluster,
        BootstrapDown,
        MergeKubeconfig,
        ApplyLoadBalancerConfig,
        Done,
    ]);
    stages
}

/// Executes a plan against one [`RuntimeContext`]
pub struct Pipeline<'a> {
    ctx: &'a RuntimeContext,
    runner: &'a dyn CommandRunner,
    input: Box<dyn AsyncBufRead + Unpin + Send + 'a>,
    output: Box<dyn Write + Send + 'a>,
    /// Files written from the dry run, applied alongside the generated set
    forwarded: Vec<String>,
}

impl<'a> Pipeline<'a> {
    /// Pipeline reading confirmations from stdin and printing to stdout
    pub fn new(ctx: &'a RuntimeContext, runner: &'a dyn CommandRunner) -> Self {
        Self {
            ctx,
            runner,
            input: Box::new(BufReader::new(tokio::io::stdin())),
            output: Box::new(std::io::stdout()),
            forwarded: Vec::new(),
        }
    }

    /// Replace the operator-facing input and output
    pub fn with_io(
        mut self,
        input: impl AsyncBufRead + Unpin + Send + 'a,
        output: impl Write + Send + 'a,
    ) -> Self {
        self.input = Box::new(input);
        self.output = Box::new(output);
        self
    }

    /// Run `stages` in order, stopping at the first failure
    pub async fn run(&mut self, stages: &[Stage]) -> Result<()> {
        let total = stages.len();
        for (index, stage) in stages.iter().copied().enumerate() {
            info!("[stage {}/{}] {}", index + 1, total, stage);
            if let Err(source) = self.execute(stage).await {
                error!(
                    stage = %stage,
                    cluster = %self.ctx.name(),
                    error = %source,
                    "stage failed"
                );
                return Err(Error::Stage {
                    stage,
                    source: Box::new(source),
                });
            }
        }
        info!(cluster = %self.ctx.name(), "provisioning complete");
        Ok(())
    }

    async fn execute(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::PrepareWorkspace => self.prepare_workspace(),
            Stage::ValidatePreflight => self.validate_preflight().await,
            Stage::AirGapSeed => self.air_gap_seed().await,
            Stage::BootstrapDown => self.bootstrap("delete").await,
            Stage::BootstrapUp => self.bootstrap("create").await,
            Stage::CreateSSHSecret => self.create_ssh_secret().await,
            Stage::GenerateInventories => self.generate_inventories(),
            Stage::ApplyInventories => self.apply_inventories().await,
            Stage::DryRun => self.dry_run().await,
            Stage::SplitDryRun => self.split_dry_run(),
            Stage::GenerateManifests => self.generate_manifests().await,
            Stage::PauseForManualEdit => self.pause_for_manual_edit().await,
            Stage::ApplyManifests => self.apply_manifests().await,
            Stage::WaitClusterReady => self.wait_cluster_ready().await,
            Stage::FetchKubeconfig => self.fetch_kubeconfig().await,
            Stage::PivotToTargetCluster => self.pivot().await,
            Stage::MergeKubeconfig => self.merge_kubeconfig(),
            Stage::ApplyLoadBalancerConfig => self.apply_load_balancer_config().await,
            Stage::Done => self.done(),
        }
    }

    // =========================================================================
    // Stages
    // =========================================================================

    fn prepare_workspace(&self) -> Result<()> {
        let ws = &self.ctx.workspace;
        fs::create_dir_all(ws.resources())?;
        fs::create_dir_all(ws.overrides())?;
        Ok(())
    }

    async fn validate_preflight(&self) -> Result<()> {
        let spec = &self.ctx.spec;
        spec.airgap.validate(spec.name())?;

        self.install_dkp()?;
        self.require_tool(KUBECTL).await?;
        if spec.airgap.enabled {
            self.require_tool(DOCKER).await?;
            let konvoy_image = self.ctx.workspace.kib().join("konvoy-image");
            if !konvoy_image.exists() {
                return Err(Error::validation(format!(
                    "{} not found, the konvoy image bundle must be extracted into {}",
                    konvoy_image.display(),
                    Workspace::KIB
                )));
            }
        }

        let reported = self.capture(Invocation::new(DKP).arg("version")).await?;
        if !reported.contains(self.ctx.dkp_version_number()) {
            return Err(Error::validation(format!(
                "./dkp reports version {:?}, cluster.yaml requires {}",
                reported.trim(),
                spec.metadata.dkpversion
            )));
        }
        Ok(())
    }

    async fn air_gap_seed(&self) -> Result<()> {
        let spec = &self.ctx.spec;
        let kib = self.ctx.workspace.kib();

        fs::create_dir_all(&kib)?;
        fs::write(kib.join("inventory.yaml"), ansible_inventory(spec).to_yaml()?)?;
        let key = self.ctx.workspace.root.join(&spec.metadata.sshprivatekey);
        let key_name = key
            .file_name()
            .ok_or_else(|| Error::validation("metadata.sshprivatekey must name a file"))?;
        fs::copy(&key, kib.join(key_name))?;

        let registry = registry_host(&spec.registry.host);
        if registry.is_empty() {
            return Err(Error::validation(
                "registry.host is required for an air-gapped install",
            ));
        }
        let version = &spec.metadata.dkpversion;
        for bundle in [
            "konvoy-image-bundle.tar.gz".to_string(),
            format!("kommander-image-bundle-{version}.tar.gz"),
            format!("dkp-insights-image-bundle-{version}.tar.gz"),
        ] {
            info!(bundle = %bundle, registry = %registry, "pushing image bundle");
            self.exec(
                Invocation::new(DKP)
                    .args(["push", "image-bundle", "--image-bundle"])
                    .arg(bundle)
                    .args(["--to-registry", registry])
                    .args(["--to-registry-username", spec.registry.username.as_str()])
                    .args(["--to-registry-password", spec.registry.password.as_str()]),
            )
            .await?;
        }

        let airgap = &spec.airgap;
        let mut upload = Invocation::new(KONVOY_IMAGE)
            .args(["upload", "artifacts", "--container-images-dir=artifacts/images/"])
            .arg(format!(
                "--os-packages-bundle=artifacts/{}_{}.tar.gz",
                airgap.k8sversion, airgap.osversion
            ))
            .arg("--pip-packages-bundle=artifacts/pip-packages.tar.gz");
        if let Some(bundle) = self.ctx.policy.containerd_bundle {
            upload = upload.arg(format!(
                "--containerd-bundle=artifacts/{bundle}-{}.tar.gz",
                airgap.containerdversion
            ));
        }
        self.exec(upload.current_dir(kib)).await?;

        self.exec(
            Invocation::new(DOCKER)
                .args(["load", "-i"])
                .arg(format!("konvoy-bootstrap_{version}.tar")),
        )
        .await?;
        Ok(())
    }

    async fn bootstrap(&self, action: &str) -> Result<()> {
        self.exec(Invocation::new(DKP).args([action, "bootstrap"]))
            .await
            .map(drop)
    }

    async fn create_ssh_secret(&self) -> Result<()> {
        let secret = ssh_key_secret_name(self.ctx.name());
        self.exec(
            Invocation::new(KUBECTL)
                .args(["create", "secret", "generic", secret.as_str()])
                .arg(format!(
                    "--from-file=ssh-privatekey={}",
                    self.ctx.spec.metadata.sshprivatekey
                )),
        )
        .await?;
        self.label_for_move(&secret).await
    }

    fn generate_inventories(&self) -> Result<()> {
        let written = self
            .ctx
            .manifests
            .write_inventories_to(&self.ctx.workspace.resources())?;
        debug!(count = written.len(), "wrote host inventories");
        Ok(())
    }

    async fn apply_inventories(&self) -> Result<()> {
        for inventory in self.ctx.manifests.inventories() {
            self.exec(
                Invocation::new(KUBECTL)
                    .args(["apply", "-f"])
                    .arg(resource_arg(&inventory.file_name())),
            )
            .await?;
        }
        Ok(())
    }

    async fn dry_run(&self) -> Result<()> {
        let spec = &self.ctx.spec;
        let name = spec.name();
        let replicas = self
            .ctx
            .policy
            .dry_run_control_plane_replicas(spec.controlplane.size());

        let manifests = self
            .capture(
                Invocation::new(DKP)
                    .args(["create", "cluster", "preprovisioned", "--cluster-name", name])
                    .args([
                        "--control-plane-endpoint-host",
                        spec.metadata.loadbalancer.as_str(),
                    ])
                    .arg("--control-plane-replicas")
                    .arg(replicas.to_string())
                    .args([
                        "--virtual-ip-interface",
                        spec.metadata.interfacename.as_str(),
                    ])
                    .args(["--dry-run", "-o", "yaml"]),
            )
            .await?;

        fs::write(self.ctx.workspace.dry_run_file(name), manifests)?;
        Ok(())
    }

    fn split_dry_run(&mut self) -> Result<()> {
        let path = self.ctx.workspace.dry_run_file(self.ctx.name());
        let file = fs::File::open(&path)?;
        let outcome = pkd_capi::split(file, &SupersededSet::for_cluster(&self.ctx.spec))
            .map_err(|e| {
                Error::command_failed("dkp create cluster preprovisioned --dry-run", e.to_string())
            })?;
        self.forwarded = outcome
            .write_forwarded(&self.ctx.workspace.resources())?
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        info!(
            forwarded = outcome.forwarded.len(),
            superseded = outcome.discarded.len(),
            "split dry-run output"
        );
        Ok(())
    }

    async fn generate_manifests(&self) -> Result<()> {
        let ws = &self.ctx.workspace;
        let written = self.ctx.manifests.write_to(&ws.resources())?;
        info!(count = written.len(), "wrote manifests");

        fs::create_dir_all(ws.overrides())?;
        for (name, _) in self.ctx.overrides.write_to(&ws.overrides())? {
            self.exec(
                Invocation::new(KUBECTL)
                    .args(["create", "secret", "generic", name.as_str()])
                    .arg(format!(
                        "--from-file=overrides.yaml={}/{name}.yaml",
                        Workspace::OVERRIDES
                    )),
            )
            .await?;
            self.label_for_move(&name).await?;
        }
        Ok(())
    }

    async fn pause_for_manual_edit(&mut self) -> Result<()> {
        writeln!(
            self.output,
            "Manifests for {} are in {}. Edit them now if needed.",
            self.ctx.name(),
            self.ctx.workspace.resources().display()
        )?;
        confirm(&mut self.input, &mut self.output).await
    }

    async fn apply_manifests(&self) -> Result<()> {
        let ws = &self.ctx.workspace;
        remove_if_exists(&ws.dry_run_file(self.ctx.name()))?;

        for file in self.applicable_manifests() {
            self.exec(
                Invocation::new(KUBECTL)
                    .args(["create", "-f"])
                    .arg(resource_arg(&file)),
            )
            .await?;
        }
        Ok(())
    }

    async fn wait_cluster_ready(&self) -> Result<()> {
        let name = self.ctx.name();
        self.exec(
            Invocation::new(KUBECTL)
                .args(["wait", "--for=condition=Ready"])
                .arg(format!("clusters/{name}"))
                .arg(timeout_arg(self.ctx.spec.metadata.kibtimeout)),
        )
        .await?;
        self.exec(
            Invocation::new(KUBECTL)
                .args(["wait", "--for=condition=Ready", "machine", "--all"])
                .arg(timeout_arg(MACHINES_READY_TIMEOUT_MINUTES)),
        )
        .await?;
        Ok(())
    }

    async fn fetch_kubeconfig(&self) -> Result<()> {
        let name = self.ctx.name();
        let kubeconfig = self
            .capture(Invocation::new(DKP).args(["get", "kubeconfig", "-c", name]))
            .await?;
        fs::write(self.ctx.workspace.kubeconfig_file(name), kubeconfig)?;
        Ok(())
    }

    async fn pivot(&self) -> Result<()> {
        let name = self.ctx.name();
        let kubeconfig = format!("{name}.conf");

        self.exec(
            Invocation::new(DKP).args(["create", "capi-components", "--kubeconfig", kubeconfig.as_str()]),
        )
        .await?;
        self.exec(
            Invocation::new(DKP).args(["move", "capi-resources", "--to-kubeconfig", kubeconfig.as_str()]),
        )
        .await?;
        for (condition, minutes) in [
            ("ControlPlaneReady", self.ctx.spec.metadata.pivottimeout),
            ("Ready", PIVOTED_READY_TIMEOUT_MINUTES),
        ] {
            self.exec(
                Invocation::new(KUBECTL)
                    .args(["--kubeconfig", kubeconfig.as_str(), "wait"])
                    .arg(format!("--for=condition={condition}"))
                    .arg(format!("clusters/{name}"))
                    .arg(timeout_arg(minutes)),
            )
            .await?;
        }
        Ok(())
    }

    fn merge_kubeconfig(&self) -> Result<()> {
        let target = match &self.ctx.kubeconfig_target {
            Some(path) => path.clone(),
            None => kubeconfig::default_kubeconfig_path()?,
        };
        let context = kubeconfig::merge_into(
            &self.ctx.workspace.kubeconfig_file(self.ctx.name()),
            &target,
        )?;
        info!(context = %context, path = %target.display(), "switched current context");
        Ok(())
    }

    async fn apply_load_balancer_config(&self) -> Result<()> {
        let name = self.ctx.name();
        let file = manifest_file_name(&metallb_manifest_name(name), KIND_CONFIG_MAP);
        self.exec(
            Invocation::new(KUBECTL)
                .arg("--kubeconfig")
                .arg(format!("{name}.conf"))
                .args(["create", "-f"])
                .arg(resource_arg(&file)),
        )
        .await
        .map(drop)
    }

    fn done(&mut self) -> Result<()> {
        let version = &self.ctx.spec.metadata.dkpversion;
        writeln!(
            self.output,
            "The DKP cluster has now been deployed. You can proceed to deploying Kommander via:\n"
        )?;
        if self.ctx.spec.airgap.enabled {
            writeln!(
                self.output,
                "./dkp install kommander --init --airgapped > install.yaml\n\
                 ./dkp install kommander --installer-config install.yaml \
                 --kommander-applications-repository kommander-applications-{version}.tar.gz \
                 --charts-bundle dkp-kommander-charts-bundle-{version}.tar.gz"
            )?;
        } else {
            writeln!(
                self.output,
                "./dkp install kommander --init > kommander.yaml\n\
                 ./dkp install kommander --installer-config kommander.yaml"
            )?;
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Copy the versioned dkp binary to `./dkp`
    ///
    /// An existing `./dkp` is used as is when no versioned binary is shipped.
    fn install_dkp(&self) -> Result<()> {
        let ws = &self.ctx.workspace;
        let source = ws.dkp_source(&self.ctx.spec.metadata.dkpversion);
        let dest = ws.dkp();

        if source.exists() {
            fs::copy(&source, &dest)?;
            set_executable(&dest)?;
            info!(from = %source.display(), "installed dkp binary");
        } else if !dest.exists() {
            return Err(Error::validation(format!(
                "dkp binary not found at {} or {}",
                source.display(),
                dest.display()
            )));
        }
        Ok(())
    }

    async fn require_tool(&self, tool: &str) -> Result<()> {
        let output = self
            .runner
            .run(&self.in_workspace(Invocation::new("which").arg(tool)))
            .await?;
        if !output.success() {
            return Err(Error::validation(format!(
                "{tool} is required but was not found on PATH"
            )));
        }
        debug!(tool, path = %output.stdout.trim(), "found tool");
        Ok(())
    }

    async fn label_for_move(&self, secret: &str) -> Result<()> {
        self.exec(
            Invocation::new(KUBECTL)
                .args(["label", "secret", secret])
                .arg(format!("{CLUSTERCTL_MOVE_LABEL}=")),
        )
        .await
        .map(drop)
    }

    /// Manifest files to create, in file-name order
    ///
    /// Only files this run produced are created: the generated set and the
    /// objects forwarded from the dry run. Inventories were applied before
    /// the dry run and the MetalLB config can only be created on the pivoted
    /// cluster. Files removed during the pause are skipped.
    fn applicable_manifests(&self) -> Vec<String> {
        let metallb = manifest_file_name(&metallb_manifest_name(self.ctx.name()), KIND_CONFIG_MAP);
        let resources = self.ctx.workspace.resources();

        self.ctx
            .manifests
            .manifests()
            .iter()
            .filter(|m| m.kind != KIND_PREPROVISIONED_INVENTORY)
            .map(GeneratedManifest::file_name)
            .chain(self.forwarded.iter().cloned())
            .filter(|file| *file != metallb)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|file| {
                let present = resources.join(file).is_file();
                if !present {
                    warn!(file = %file, "manifest removed before apply, skipping");
                }
                present
            })
            .collect()
    }

    fn in_workspace(&self, invocation: Invocation) -> Invocation {
        if invocation.dir.is_some() {
            invocation
        } else {
            invocation.current_dir(&self.ctx.workspace.root)
        }
    }

    /// Run to success, logging everything the command printed
    async fn exec(&self, invocation: Invocation) -> Result<CommandOutput> {
        let invocation = self.in_workspace(invocation);
        let output = self.runner.run(&invocation).await?;
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            info!("{line}");
        }
        check(&invocation, output)
    }

    /// Run to success and return stdout; only stderr is logged
    async fn capture(&self, invocation: Invocation) -> Result<String> {
        let invocation = self.in_workspace(invocation);
        let output = self.runner.run(&invocation).await?;
        for line in output.stderr.lines() {
            info!("{line}");
        }
        check(&invocation, output).map(|output| output.stdout)
    }
}

fn check(invocation: &Invocation, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    warn!(command = %invocation, status = ?output.status, "command failed");
    Err(Error::command_failed(
        invocation.to_string(),
        output.combined(),
    ))
}

/// `resources/<file>`, relative to the work directory
fn resource_arg(file: &str) -> String {
    format!("{}/{file}", Workspace::RESOURCES)
}

fn timeout_arg(minutes: u32) -> String {
    format!("--timeout={minutes}m")
}

/// Registry address for `dkp push`, without scheme
fn registry_host(host: &str) -> &str {
    host.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
