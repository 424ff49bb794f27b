//! Error types for the CLI

use crate::pipeline::Stage;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// cluster.yaml is missing, malformed or inconsistent
    #[error("configuration error: {0}")]
    Config(#[source] pkd_common::Error),

    /// Manifests or overrides could not be produced
    #[error("generation error: {0}")]
    Generation(#[source] pkd_common::Error),

    #[error("command `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("bundle error: {0}")]
    Bundle(#[from] pkd_bundle::Error),

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// A pipeline stage failed; the run stops here
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("interrupted")]
    Interrupted,
}

impl From<pkd_common::Error> for Error {
    fn from(e: pkd_common::Error) -> Self {
        if e.is_validation() {
            Error::Config(e)
        } else {
            Error::Generation(e)
        }
    }
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Config(pkd_common::Error::validation(message))
    }

    pub fn command_failed(command: impl Into<String>, output: impl Into<String>) -> Self {
        Error::CommandFailed {
            command: command.into(),
            output: output.into(),
        }
    }

    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Download {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Process exit status for this error
    ///
    /// Stage failures report the class of their cause.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Stage { source, .. } => source.exit_code(),
            Error::Config(_) => 2,
            Error::Generation(_) => 3,
            Error::CommandFailed { .. }
            | Error::Download { .. }
            | Error::Bundle(_)
            | Error::Kubeconfig(_) => 4,
            Error::Interrupted => 130,
            Error::Io(_) | Error::Yaml(_) => 1,
        }
    }
}
