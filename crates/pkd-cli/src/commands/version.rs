//! `pkd version` - print the pkd version and the dkp version in the work dir

use std::io::Write;
use std::path::Path;

use clap::Args;
use tracing::warn;

use crate::runner::{CommandRunner, Invocation, TokioCommandRunner};
use crate::{GlobalArgs, Result};

/// Print versions
#[derive(Args, Debug, Default)]
pub struct VersionArgs {}

pub async fn run(_args: VersionArgs, global: &GlobalArgs) -> Result<()> {
    report(&TokioCommandRunner, &global.work_dir, &mut std::io::stdout()).await
}

/// Write both versions to `out`
///
/// A missing or broken `./dkp` is reported but does not fail the command.
pub async fn report(
    runner: &dyn CommandRunner,
    work_dir: &Path,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "pkd: v{}", env!("CARGO_PKG_VERSION"))?;

    let invocation = Invocation::new("./dkp").arg("version").current_dir(work_dir);
    match runner.run(&invocation).await {
        Ok(output) if output.success() => write!(out, "{}", output.stdout)?,
        Ok(output) => warn!(status = ?output.status, output = %output.combined(), "./dkp version failed"),
        Err(e) => warn!(error = %e, "no dkp binary in the work directory"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, MockCommandRunner};

    #[tokio::test]
    async fn prints_both_versions() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.program == "./dkp" && inv.args == ["version"])
            .returning(|_| Ok(CommandOutput::ok("dkp: v2.6.0\n")));

        let mut out = Vec::new();
        report(&runner, Path::new("."), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(&format!("pkd: v{}\n", env!("CARGO_PKG_VERSION"))));
        assert!(text.contains("dkp: v2.6.0"));
    }

    #[tokio::test]
    async fn missing_dkp_is_not_fatal() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|inv| Err(crate::Error::command_failed(inv.to_string(), "not found")));

        let mut out = Vec::new();
        report(&runner, Path::new("."), &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("pkd: "));
    }
}
