//! Shell execution abstraction
//!
//! Every task converges host state through this module: run a command,
//! optionally as another user, and validate its exit code. String
//! commands go through `sh -c`; argv lists execute directly.

use anyhow::{Context as _, Result, bail};
use std::path::Path;
use std::process::Command;

/// Captured output of a finished command, with both streams trimmed.
#[derive(Debug, Clone)]
pub struct ShellResult {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Exit codes accepted without failing the run. `None` disables the
/// check entirely; condition probes inspect the code themselves.
pub const OK: Option<&[i32]> = Some(&[0]);
pub const ANY: Option<&[i32]> = None;

/// Run a shell-interpreted command string.
pub fn run_sh(
    command: &str,
    directory: Option<&Path>,
    become_user: Option<&str>,
    valid_return_codes: Option<&[i32]>,
) -> Result<ShellResult> {
    let line = match become_user {
        Some(user) => format!("sudo -u {user} {command}"),
        None => command.to_string(),
    };

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&line);
    execute(cmd, &line, directory, valid_return_codes)
}

/// Run an argv-style command without shell interpretation.
pub fn run_argv(
    args: &[&str],
    directory: Option<&Path>,
    become_user: Option<&str>,
    valid_return_codes: Option<&[i32]>,
) -> Result<ShellResult> {
    let mut argv: Vec<&str> = Vec::with_capacity(args.len() + 3);
    if let Some(user) = become_user {
        argv.extend(["sudo", "-u", user]);
    }
    argv.extend_from_slice(args);

    let Some((program, rest)) = argv.split_first() else {
        bail!("Cannot run an empty command");
    };

    let mut cmd = Command::new(program);
    cmd.args(rest);
    execute(cmd, &argv.join(" "), directory, valid_return_codes)
}

fn execute(
    mut cmd: Command,
    display: &str,
    directory: Option<&Path>,
    valid_return_codes: Option<&[i32]>,
) -> Result<ShellResult> {
    if let Some(dir) = directory {
        cmd.current_dir(dir);
    }

    log::debug!("shell: {display}");

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute '{display}'"))?;

    let return_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if let Some(valid) = valid_return_codes {
        if !valid.is_empty() && !valid.contains(&return_code) {
            bail!("Unexpected error from '{display}' (exit code {return_code}):\n\n{stderr}");
        }
    }

    Ok(ShellResult {
        return_code,
        stdout: stdout.trim().to_string(),
        stderr: stderr.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_sh_captures_stdout() {
        let result = run_sh("echo hello", None, None, OK).unwrap();
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "");
    }

    #[test]
    fn test_run_argv_no_shell_interpretation() {
        let result = run_argv(&["echo", "$HOME"], None, None, OK).unwrap();
        assert_eq!(result.stdout, "$HOME");
    }

    #[test]
    fn test_run_sh_respects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_sh("pwd", Some(dir.path()), None, OK).unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(result.stdout, expected.to_string_lossy());
    }

    #[test]
    fn test_unexpected_exit_code_fails() {
        let err = run_sh("exit 3", None, None, OK).unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }

    #[test]
    fn test_any_exit_code_allowed() {
        let result = run_sh("exit 3", None, None, ANY).unwrap();
        assert_eq!(result.return_code, 3);
    }

    #[test]
    fn test_custom_valid_codes() {
        let result = run_sh("exit 2", None, None, Some(&[0, 2])).unwrap();
        assert_eq!(result.return_code, 2);
    }
}
