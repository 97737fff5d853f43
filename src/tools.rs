use std::fs;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use color_eyre::{eyre::Context as _, Report, Result};
use tracing::{debug, instrument};

use crate::error::Fatal;

/// A spawned external tool with its stdout ready for parsing. stderr is
/// collected at `finish` time; the dumps the tools print there are small.
pub struct ToolRun {
    child: Child,
    reader: Box<dyn BufRead>,
    tool: String,
}

impl std::fmt::Debug for ToolRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRun")
            .field("child", &self.child)
            .field("tool", &self.tool)
            .finish()
    }
}

/// Spawn a tool with piped output. With `save_as`, the raw output is
/// buffered and persisted for audit before parsing; otherwise it streams.
#[instrument(skip(args))]
pub fn run_tool(tool: &str, args: &[&str], save_as: Option<&Path>) -> Result<ToolRun> {
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                Report::new(Fatal::MissingTool(tool.to_owned()))
            } else {
                Report::new(err).wrap_err(format!("failed to spawn {tool}"))
            }
        })?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let reader: Box<dyn BufRead> = match save_as {
        Some(path) => {
            let mut buf = Vec::new();
            BufReader::new(stdout)
                .read_to_end(&mut buf)
                .wrap_err_with(|| format!("failed to read {tool} output"))?;
            fs::write(path, &buf)
                .wrap_err_with(|| format!("failed to save {tool} output to {}", path.display()))?;
            debug!(tool, path = %path.display(), bytes = buf.len(), "saved raw tool output");
            Box::new(Cursor::new(buf))
        }
        None => Box::new(BufReader::new(stdout)),
    };

    Ok(ToolRun {
        child,
        reader,
        tool: tool.to_owned(),
    })
}

impl ToolRun {
    /// Parse the tool's stdout, then reap the child. Returns the parse
    /// result and the tool's stderr for diagnosis.
    pub fn parse<T>(
        mut self,
        parse: impl FnOnce(&mut dyn BufRead) -> Result<T>,
    ) -> Result<(T, String)> {
        let value = parse(&mut *self.reader)?;

        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            pipe.read_to_string(&mut stderr)
                .wrap_err_with(|| format!("failed to read {} stderr", self.tool))?;
        }
        let status = self
            .child
            .wait()
            .wrap_err_with(|| format!("failed to wait for {}", self.tool))?;
        if !status.success() {
            debug!(tool = self.tool, %status, stderr, "tool exited with failure");
        }
        Ok((value, stderr))
    }
}

/// The disassembler reports missing debug information as a `No DWARF`
/// diagnostic rather than structured output.
pub fn check_debug_info(stderr: &str, object: &Path) -> Result<()> {
    if stderr.contains("No DWARF") {
        return Err(Report::new(Fatal::NoDebugInfo(
            object.display().to_string(),
        )));
    }
    Ok(())
}

/// Destination for one raw tool output under `--extra-info`.
pub fn extra_info_path(dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("failed to create extra-info dir {}", dir.display()))?;
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_maps_to_exit_code_three() {
        let err = run_tool("definitely-not-a-real-tool-9f3a", &[], None).unwrap_err();
        let fatal = err.downcast_ref::<Fatal>().expect("Fatal kind");
        assert_eq!(fatal.exit_code(), 3);
    }

    #[test]
    fn stdout_streams_through_the_parser() {
        let run = run_tool("echo", &["hello world"], None).unwrap();
        let (lines, stderr) = run
            .parse(|r| {
                let mut out = Vec::new();
                for line in r.lines() {
                    out.push(line?);
                }
                Ok(out)
            })
            .unwrap();
        assert_eq!(lines, vec!["hello world"]);
        assert!(stderr.is_empty());
    }

    #[test]
    fn no_dwarf_diagnostic_is_fatal() {
        let err = check_debug_info(
            "eu-readelf: cannot get debug context descriptor: No DWARF information found",
            Path::new("lib.so"),
        )
        .unwrap_err();
        assert_eq!(err.downcast_ref::<Fatal>().unwrap().exit_code(), 4);
    }
}
