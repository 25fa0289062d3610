use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::info;

use crate::error::{Result, ScanError};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[a-zA-Z0-9_][-.a-zA-Z0-9_]{0,127}$").unwrap());

/// Append `:latest` when the ref carries no tag. A trailing `:5000/foo`
/// (registry port) is not a tag.
pub fn normalize_image_ref(image: &str) -> String {
    if TAG_RE.is_match(image) {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

/// `docker pull <image>`, bounded by `timeout`.
pub fn docker_pull(image: &str, timeout: Duration) -> Result<()> {
    info!(image, "pulling image");
    let mut cmd = Command::new("docker");
    cmd.args(["pull", image]);
    let output = run_with_timeout(cmd, timeout)?;
    if !output.status.success() {
        return Err(ScanError::ExternalToolFailure {
            command: format!("docker pull {image}"),
            reason: format!("image not found: {}", output.stderr.trim()),
        });
    }
    Ok(())
}

/// `docker save <image> -o <destination>`, bounded by `timeout`.
///
/// A "no such image" failure triggers one `docker pull` followed by exactly
/// one retry of the save; any other failure, or a failure after the retry,
/// is fatal.
pub fn docker_save(image: &str, destination: &Path, timeout: Duration) -> Result<()> {
    let image = normalize_image_ref(image);
    match run_save(&image, destination, timeout) {
        Ok(()) => Ok(()),
        Err(SaveFailure::ImageNotFound) => {
            info!(image, "image not present locally, pulling first");
            docker_pull(&image, timeout)?;
            run_save(&image, destination, timeout).map_err(|f| f.into_error(&image, destination))
        }
        Err(failure) => Err(failure.into_error(&image, destination)),
    }
}

enum SaveFailure {
    ImageNotFound,
    Fatal(ScanError),
}

impl SaveFailure {
    fn into_error(self, image: &str, destination: &Path) -> ScanError {
        match self {
            SaveFailure::Fatal(err) => err,
            SaveFailure::ImageNotFound => ScanError::ExternalToolFailure {
                command: format!("docker save {image} -o {}", destination.display()),
                reason: "image not found after pull".to_string(),
            },
        }
    }
}

fn run_save(
    image: &str,
    destination: &Path,
    timeout: Duration,
) -> std::result::Result<(), SaveFailure> {
    let mut cmd = Command::new("docker");
    cmd.args(["save", image, "-o"]).arg(destination);
    let output = run_with_timeout(cmd, timeout).map_err(SaveFailure::Fatal)?;

    if output.status.success() {
        return Ok(());
    }
    if output.stderr.contains("No such image") || output.stderr.contains("reference does not exist")
    {
        return Err(SaveFailure::ImageNotFound);
    }
    Err(SaveFailure::Fatal(ScanError::ExternalToolFailure {
        command: format!("docker save {image} -o {}", destination.display()),
        reason: output.stderr.trim().to_string(),
    }))
}

#[derive(Debug)]
struct ToolOutput {
    status: std::process::ExitStatus,
    stderr: String,
}

/// Run a command, killing it if it exceeds `timeout`.
///
/// stdout/stderr are drained on threads so a chatty child cannot fill a pipe
/// and wedge against the `try_wait` poll loop.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ToolOutput> {
    let command_line = format_command(&cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ScanError::ExternalToolFailure {
            command: command_line.clone(),
            reason: format!("could not start: {e}"),
        })?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let out_thread = std::thread::spawn(move || drain(stdout));
    let err_thread = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                return Err(ScanError::ExternalToolFailure {
                    command: command_line,
                    reason: format!("wait failed: {e}"),
                });
            }
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ScanError::ExternalToolFailure {
                command: command_line,
                reason: format!("timed out after {}s", timeout.as_secs()),
            });
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let _ = out_thread.join();
    let stderr = err_thread.join().unwrap_or_default();
    Ok(ToolOutput { status, stderr })
}

fn drain(mut reader: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn format_command(cmd: &Command) -> String {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_refs_get_latest() {
        assert_eq!(normalize_image_ref("alpine"), "alpine:latest");
        assert_eq!(normalize_image_ref("alpine:3.19"), "alpine:3.19");
        assert_eq!(
            normalize_image_ref("ghcr.io/acme/api:v1.2-rc.1"),
            "ghcr.io/acme/api:v1.2-rc.1"
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        assert_eq!(
            normalize_image_ref("registry:5000/acme/api"),
            "registry:5000/acme/api:latest"
        );
    }

    #[test]
    fn run_with_timeout_reports_exit_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let output = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert!(!output.status.success());
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn run_with_timeout_kills_slow_commands() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_with_timeout(cmd, Duration::from_millis(200)).unwrap_err();
        match err {
            ScanError::ExternalToolFailure { command, reason } => {
                assert!(command.starts_with("sleep"));
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
