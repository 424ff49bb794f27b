//! Operator confirmation for the manual-edit pause

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{Error, Result};

pub const PROMPT: &str = "Ready to continue? Type y or yes to confirm: ";

/// Block until the operator types `y` or `yes` (any case)
///
/// Blank lines and anything else re-prompt. End of input means the operator
/// went away, which aborts the run.
pub async fn confirm<R, W>(input: &mut R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut line = String::new();
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line).await? == 0 {
            return Err(Error::Interrupted);
        }
        if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            return Ok(());
        }
    }
}
