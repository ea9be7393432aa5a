/// Runs one external binary and turns a nonzero exit into an error.
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::command::ToolCommand;
use crate::error::PipelineError;
use crate::parse::tail_lines;

/// Lines of captured output attached to a failure.
const FAILURE_TAIL_LINES: usize = 20;

/// Run `cmd` in `cwd`, blocking until it exits.
///
/// With `log`, stdout and stderr both go to that file (truncated first) and
/// the failure message carries its last lines. Without one, output is
/// captured in memory and only surfaces on failure.
pub fn run_tool(cmd: &ToolCommand, cwd: &Path, log: Option<&Path>) -> Result<()> {
    log::debug!("{}", cmd);
    let mut process = Command::new(&cmd.program);
    process.args(&cmd.args).current_dir(cwd).stdin(Stdio::null());

    let launch_err = |source: std::io::Error| PipelineError::ToolLaunch {
        tool: cmd.program.clone(),
        source,
    };

    match log {
        Some(log_path) => {
            let stdout = File::create(log_path)
                .with_context(|| format!("creating log '{}'", log_path.display()))?;
            let stderr = stdout
                .try_clone()
                .with_context(|| format!("duplicating handle for '{}'", log_path.display()))?;
            let status = process
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(stderr))
                .status()
                .map_err(launch_err)?;
            if !status.success() {
                return Err(PipelineError::ToolFailed {
                    tool: cmd.program.clone(),
                    status: status.to_string(),
                    tail: tail_lines(log_path, FAILURE_TAIL_LINES),
                }
                .into());
            }
        }
        None => {
            let output = process.output().map_err(launch_err)?;
            if !output.status.success() {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let lines: Vec<&str> = text.lines().collect();
                let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
                return Err(PipelineError::ToolFailed {
                    tool: cmd.program.clone(),
                    status: output.status.to_string(),
                    tail: lines[start..].join("\n"),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Width of the `-`-padded banner above each section of a combined log.
const BANNER_WIDTH: usize = 50;

/// Concatenate per-unit logs into one file, each preceded by a centred
/// banner naming the section.
pub fn concat_logs(out: &Path, sections: &[(String, PathBuf)]) -> Result<()> {
    let file = File::create(out).with_context(|| format!("creating '{}'", out.display()))?;
    let mut writer = BufWriter::new(file);
    for (title, path) in sections {
        writeln!(writer, "{:-^width$}", title, width = BANNER_WIDTH)?;
        let mut log = File::open(path).with_context(|| format!("opening log '{}'", path.display()))?;
        std::io::copy(&mut log, &mut writer)
            .with_context(|| format!("copying '{}' into '{}'", path.display(), out.display()))?;
    }
    writer.flush()?;
    Ok(())
}
