//! Merging the new cluster's kubeconfig into the operator's default one
//!
//! Entries from the new cluster win on name collisions and its context becomes
//! the current one. The merged file replaces the target atomically and is only
//! readable by the owner.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use kube::config::Kubeconfig;
use tracing::info;

use crate::{Error, Result};

/// `~/.kube/config`
pub fn default_kubeconfig_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .ok_or_else(|| Error::Kubeconfig("cannot determine home directory".to_string()))
}

/// Merge `new_config` into `target`, creating `target` if it does not exist
///
/// Returns the name of the context that is now current.
pub fn merge_into(new_config: &Path, target: &Path) -> Result<String> {
    let incoming = read(new_config)?;
    let context = incoming
        .current_context
        .clone()
        .or_else(|| incoming.contexts.first().map(|c| c.name.clone()))
        .ok_or_else(|| {
            Error::Kubeconfig(format!("{} has no contexts", new_config.display()))
        })?;

    let mut merged = if target.exists() {
        let existing = read(target)?;
        incoming
            .merge(existing)
            .map_err(|e| Error::Kubeconfig(format!("failed to merge kubeconfigs: {e}")))?
    } else {
        incoming
    };
    merged.current_context = Some(context.clone());

    let yaml = serde_yaml::to_string(&merged)
        .map_err(|e| Error::Kubeconfig(format!("failed to serialize kubeconfig: {e}")))?;
    write_private(target, yaml.as_bytes())?;

    info!(context = %context, path = %target.display(), "kubeconfig merged");
    Ok(context)
}

fn read(path: &Path) -> Result<Kubeconfig> {
    Kubeconfig::read_from(path)
        .map_err(|e| Error::Kubeconfig(format!("failed to read {}: {e}", path.display())))
}

/// Write through a sibling temp file so a crash never leaves a truncated config
fn write_private(target: &Path, contents: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let tmp = parent.join(format!(".{file_name}.pkd-tmp"));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, target)?;
    Ok(())
}
