//! CLI commands

use std::fmt::Display;
use std::path::{Path, PathBuf};

use pkd_common::ClusterSpec;

use crate::{Error, Result};

pub mod airgap;
pub mod generate;
pub mod import;
pub mod init;
pub mod up;
pub mod version;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
///
/// This reduces boilerplate for the common pattern of
/// `.map_err(|e| Error::command_failed(command, e.to_string()))`.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` for `command` using its Display implementation.
    fn cmd_err(self, command: &str) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self, command: &str) -> Result<T> {
        self.map_err(|e| Error::command_failed(command, e.to_string()))
    }
}

/// Resolve the config path against the work dir unless it is absolute
pub fn config_path(work_dir: &Path, config: &Path) -> PathBuf {
    if config.is_absolute() {
        config.to_path_buf()
    } else {
        work_dir.join(config)
    }
}

/// Load cluster.yaml, reporting any failure as a configuration error
pub fn load_spec(work_dir: &Path, config: &Path) -> Result<ClusterSpec> {
    let path = config_path(work_dir, config);
    ClusterSpec::load(&path).map_err(|e| match e {
        pkd_common::Error::Io { .. } | pkd_common::Error::Yaml(_) => Error::Config(e),
        other => other.into(),
    })
}
