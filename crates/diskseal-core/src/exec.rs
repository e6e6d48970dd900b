//! Execution layer for external tool wrappers.
//!
//! Keeps process plumbing isolated so the tool wrappers stay testable
//! (fake binaries, deterministic stdout parsing). Exit status is the sole
//! success signal; stdout/stderr are captured for diagnostics only.

use crate::error::{DisksealError, DisksealResult};
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured result of one external tool invocation.
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Trimmed stderr when present, otherwise trimmed stdout.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            stdout.to_string()
        }
    }
}

/// Why an invocation produced no usable [`ExecOutput`].
///
/// Callers map this into their own taxonomy variant; the execution layer
/// cannot know whether a dead `sgdisk` is a device query or a resize.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to launch {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("{} timed out after {timeout:?}", binary.display())]
    Timeout { binary: PathBuf, timeout: Duration },
    #[error("{} output reader thread panicked", binary.display())]
    Reader { binary: PathBuf },
}

/// Run `binary` with `args`, killing it once `timeout` elapses.
pub fn run_with_timeout(
    binary: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;

    let stdout_handle = spawn_output_reader(child.stdout.take());
    let stderr_handle = spawn_output_reader(child.stderr.take());

    let status = wait_with_timeout(&mut child, binary, timeout)?;

    let stdout = stdout_handle.join().map_err(|_| ExecError::Reader {
        binary: binary.to_path_buf(),
    })?;
    let stderr = stderr_handle.join().map_err(|_| ExecError::Reader {
        binary: binary.to_path_buf(),
    })?;

    Ok(ExecOutput {
        stdout,
        stderr,
        status,
    })
}

fn wait_with_timeout(child: &mut Child, binary: &Path, timeout: Duration) -> Result<i32, ExecError> {
    let start = Instant::now();
    while start.elapsed() <= timeout {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status.code().unwrap_or(-1)),
            Ok(None) => thread::sleep(Duration::from_millis(25)),
            Err(source) => {
                return Err(ExecError::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                })
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    Err(ExecError::Timeout {
        binary: binary.to_path_buf(),
        timeout,
    })
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let Some(mut reader) = pipe else {
            return String::new();
        };
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Workflows mutate partition tables and block devices; refuse to start
/// without the privileges those operations need.
pub fn ensure_root() -> DisksealResult<()> {
    if running_as_root() {
        Ok(())
    } else {
        Err(DisksealError::Privilege(
            "partition-table and block-encryption operations require root; \
             run DiskSeal from the provisioning ramdisk as root"
                .into(),
        ))
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn captures_stdout_and_status() {
        let out = run_with_timeout(
            Path::new("/bin/sh"),
            &args(&["-c", "echo hello; exit 3"]),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.status, 3);
        assert!(!out.success());
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let out = run_with_timeout(
            Path::new("/bin/sh"),
            &args(&["-c", "echo out; echo err >&2"]),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out.diagnostic(), "err");
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = run_with_timeout(
            Path::new("/nonexistent/diskseal-tool"),
            &[],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn long_running_command_times_out() {
        let err = run_with_timeout(
            Path::new("/bin/sh"),
            &args(&["-c", "sleep 10"]),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
