use anyhow::{bail, Context, Result};
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

pub const SHELL: &str = "/bin/sh";

/// `/bin/sh -c <line>`.
pub fn shell(line: &str) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(line);
    cmd
}

/// Start `cmd` in a new session and forget about it. A reaper thread waits on
/// the child so it never lingers as a zombie.
fn spawn_detached(mut cmd: Command, what: &str) -> Result<u32> {
    cmd.stdin(Stdio::null());
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let mut child = cmd.spawn().with_context(|| format!("spawning {what}"))?;
    let pid = child.id();
    let label = what.to_string();
    std::thread::Builder::new()
        .name(format!("reap-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => debug!(pid, command = %label, %status, "child exited"),
            Err(err) => debug!(pid, command = %label, "wait failed: {err}"),
        })
        .context("starting reaper thread")?;
    debug!(pid, command = what, "spawned");
    Ok(pid)
}

pub fn spawn_shell(line: &str) -> Result<u32> {
    if line.trim().is_empty() {
        bail!("empty command");
    }
    spawn_detached(shell(line), line)
}

pub fn spawn_argv(argv: &[String]) -> Result<u32> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::null()).stderr(Stdio::null());
    spawn_detached(cmd, program)
}

/// Run a shell line to completion and return stdout. Non-zero exit is an error.
pub fn run_capture(line: &str) -> Result<String> {
    let output = shell(line)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("running {line}"))?;
    if !output.status.success() {
        bail!("{line} exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn run_status(line: &str) -> Result<ExitStatus> {
    shell(line)
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("running {line}"))
}

pub fn run_argv(argv: &[&str]) -> Result<ExitStatus> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };
    Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("running {program}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_returns_stdout() {
        let out = run_capture("printf 'Caption: hi\\n'").unwrap();
        assert_eq!(out, "Caption: hi\n");
    }

    #[test]
    fn capture_fails_on_nonzero_exit() {
        assert!(run_capture("exit 3").is_err());
    }

    #[test]
    fn status_reports_exit_code() {
        assert_eq!(run_status("exit 2").unwrap().code(), Some(2));
        assert!(run_argv(&["true"]).unwrap().success());
    }

    #[test]
    fn detached_spawn_runs_in_its_own_session() {
        let marker = std::env::temp_dir().join(format!("kdesk-spawn-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        let line = format!(
            "set -- $(cat /proc/$$/stat); echo $6 > {m}.tmp && mv {m}.tmp {m}",
            m = marker.display()
        );
        let pid = spawn_shell(&line).unwrap();
        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        let sid: u32 = std::fs::read_to_string(&marker)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(sid, pid);
        let _ = std::fs::remove_file(marker);
    }

    #[test]
    fn empty_commands_are_rejected() {
        assert!(spawn_shell("   ").is_err());
        assert!(spawn_argv(&[]).is_err());
    }
}
