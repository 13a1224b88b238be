//! External extraction command.
//!
//! The extractor is an opaque CLI tool.  Its contract with us is:
//! - combined stdout/stderr text, one message per line;
//! - on success, a line `Generated: <relative path>` naming the PDF it wrote
//!   below its working directory, and exit status zero.

use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::runtime::types::{Artifact, TaskFailure};

/// Prefix of the line announcing the produced file.
pub const GENERATED_MARKER: &str = "Generated:";

/// Number of trailing output lines kept in a failure diagnostic.
pub const TAIL_LINES: usize = 5;

/// Something that turns a URL into a document.
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    async fn extract(&self, url: &str) -> Result<Artifact, TaskFailure>;
}

/// Runs `<program> <args..> <url>` inside `work_dir`.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), work_dir: work_dir.into() }
    }

    /// Arguments placed before the URL (e.g. `["start"]` for `npm start`).
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Launch the command and collect its output until it exits.
    ///
    /// stdout and stderr share one pipe, so lines arrive in the order the
    /// command wrote them.
    async fn run(&self, url: &str) -> Result<(ExitStatus, Vec<String>), TaskFailure> {
        let launch = |e: std::io::Error| TaskFailure::Launch(e.to_string());
        let (reader, writer) = std::io::pipe().map_err(launch)?;
        let stderr = writer.try_clone().map_err(launch)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(url)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let spawned = command.spawn();
        // Our copies of the write end live in `command`; the reader only
        // sees EOF once they are closed.
        drop(command);
        let mut child = spawned.map_err(launch)?;
        let _group = ProcessGroup::of(&child);

        info!(program = %self.program, pid = ?child.id(), "extractor started");

        let output = output_reader(reader)?;
        let (lines, status) = tokio::join!(read_lines(output), child.wait());
        Ok((status?, lines?))
    }
}

#[async_trait]
impl Extractor for CommandExtractor {
    async fn extract(&self, url: &str) -> Result<Artifact, TaskFailure> {
        let (status, lines) = self.run(url).await?;
        let filename = interpret_output(status.code(), &lines)?;
        let path = resolve_artifact(&self.work_dir, &filename)?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TaskFailure::MissingArtifact { path: path.display().to_string() });
        }
        let content = tokio::fs::read(&path).await?;
        info!(file = %path.display(), bytes = content.len(), "extractor produced artifact");
        Ok(Artifact::new(filename, content))
    }
}

/// Every line of `reader`, trimmed.  Invalid UTF-8 is replaced rather
/// than treated as an error.
async fn read_lines<R>(reader: R) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(lines);
        }
        let line = String::from_utf8_lossy(&buf).trim().to_owned();
        debug!(target: "docgrab::extractor", "{line}");
        lines.push(line);
    }
}

#[cfg(unix)]
fn output_reader(reader: std::io::PipeReader) -> std::io::Result<impl AsyncRead + Unpin> {
    tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())
}

#[cfg(not(unix))]
fn output_reader(reader: std::io::PipeReader) -> std::io::Result<impl AsyncRead + Unpin> {
    let handle = std::os::windows::io::OwnedHandle::from(reader);
    Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

/// Kills the command's whole process group when dropped, so a browser
/// started by the extractor does not outlive its task.
struct ProcessGroup {
    #[cfg(unix)]
    id: Option<libc::pid_t>,
}

impl ProcessGroup {
    #[cfg(unix)]
    fn of(child: &tokio::process::Child) -> Self {
        Self { id: child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) }
    }

    #[cfg(not(unix))]
    fn of(_child: &tokio::process::Child) -> Self {
        Self {}
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.id.take() {
            // SAFETY: killpg takes plain integers and touches no memory.
            // ESRCH (group already gone) is the common case and is ignored.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

/// The last `n` lines joined by newlines.
pub(crate) fn tail(lines: &[String], n: usize) -> String {
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Decide the outcome from exit code and captured output.  Returns the
/// announced filename on success.
pub(crate) fn interpret_output(code: Option<i32>, lines: &[String]) -> Result<String, TaskFailure> {
    match code {
        Some(0) => {}
        Some(code) => {
            return Err(TaskFailure::ExitCode { code, tail: tail(lines, TAIL_LINES) });
        }
        None => return Err(TaskFailure::Signalled { tail: tail(lines, TAIL_LINES) }),
    }

    lines
        .iter()
        .find_map(|line| line.strip_prefix(GENERATED_MARKER))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .ok_or(TaskFailure::MissingMarker)
}

/// Join `name` onto `work_dir`, refusing absolute paths and `..`.
pub(crate) fn resolve_artifact(work_dir: &Path, name: &str) -> Result<PathBuf, TaskFailure> {
    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(TaskFailure::EscapesWorkDir { name: name.to_owned() });
    }
    Ok(work_dir.join(relative))
}
